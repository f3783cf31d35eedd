use crate::app::cache::CredentialCache;
use crate::app::cli::{Action, ExecCredentialInput, SaveKubeconfigInput};
use crate::app::config::AppContext;
use crate::app::exec_credential::{CredentialCacheManager, ExecCredential};
use crate::app::gridscale::{CredentialProvider, GridscaleClient};
use crate::app::kubeconfig::{ensure_exists, resolve_kubeconfig_path, AuthMode, ExecConfig, Kubeconfig};
use crate::cli::args::parse_args;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub async fn run() -> Result<()> {
    init_logging();
    let args = parse_args();

    match Action::from(args.command) {
        Action::SaveKubeconfig(input) => {
            let ctx = AppContext::load(args.config.as_deref(), &args.account)?;
            let provider = GridscaleClient::new(&ctx.account)?;
            let auth = auth_mode(&ctx, &input)?;
            let path = save_kubeconfig(&provider, &input, &auth).await?;
            log::info!("Saved cluster {} to {}", input.cluster_id, path.display());
        }
        Action::ExecCredential(input) => {
            // kubectl reads stdout as the credential. Failures are only reported on stderr.
            let mut stdout = tokio::io::stdout();
            if let Err(err) = exec_credential(args.config.as_deref(), &args.account, &input, &mut stdout).await {
                log::error!("{err:#}");
            }
        }
    }
    Ok(())
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .target(env_logger::Target::Stderr)
        .init();
}

fn auth_mode(ctx: &AppContext, input: &SaveKubeconfigInput) -> Result<AuthMode> {
    if !input.credential_plugin {
        return Ok(AuthMode::Embedded);
    }
    let command = std::env::current_exe().context("Unable to determine the path of this executable")?;
    Ok(AuthMode::ExecPlugin(ExecConfig::exec_credential(
        &command,
        &ctx.config_path,
        &ctx.account.name,
        &input.cluster_id,
    )))
}

/// Fetches the cluster's credentials and merges them into the resolved kubeconfig.
///
/// The kubeconfig on disk is only replaced once the merge has fully succeeded.
pub async fn save_kubeconfig<P: CredentialProvider + ?Sized>(
    provider: &P,
    input: &SaveKubeconfigInput,
    auth: &AuthMode,
) -> Result<PathBuf> {
    let path = resolve_kubeconfig_path(input.kubeconfig.as_deref())?;
    ensure_exists(&path)?;
    let mut kubeconfig = Kubeconfig::load(&path)?;

    let bundle = provider
        .fetch_credentials(&input.cluster_id)
        .await
        .with_context(|| format!("Failed to fetch credentials for cluster {}", input.cluster_id))?;
    kubeconfig.merge_bundle(&bundle, auth)?;
    kubeconfig.save(&path)?;
    Ok(path)
}

async fn exec_credential<W: AsyncWrite + Unpin>(
    config: Option<&Path>,
    account: &str,
    input: &ExecCredentialInput,
    out: &mut W,
) -> Result<()> {
    let ctx = AppContext::load(config, account)?;
    check_kubeconfig(input.kubeconfig.as_deref());

    let provider = GridscaleClient::new(&ctx.account)?;
    write_exec_credential(&ctx, &provider, &input.cluster_id, out).await
}

/// Writes the cluster's exec credential to `out` as a single JSON document.
///
/// Nothing is written unless the whole document could be produced.
pub async fn write_exec_credential<P, W>(
    ctx: &AppContext,
    provider: &P,
    cluster_id: &str,
    out: &mut W,
) -> Result<()>
where
    P: CredentialProvider + ?Sized,
    W: AsyncWrite + Unpin,
{
    let credential = provide_credential(ctx, provider, cluster_id).await?;

    let mut json = credential.to_json_pretty()?;
    json.push('\n');
    out.write_all(json.as_bytes()).await?;
    out.flush().await?;
    Ok(())
}

pub async fn provide_credential<P: CredentialProvider + ?Sized>(
    ctx: &AppContext,
    provider: &P,
    cluster_id: &str,
) -> Result<ExecCredential> {
    let cache = CredentialCache::for_config_file(&ctx.config_path);
    let manager = CredentialCacheManager::new(provider, cache, ctx.account.name.as_str());
    Ok(manager.exec_credential(cluster_id).await?)
}

/// The credential flow does not depend on the kubeconfig, so problems with it are only warnings.
fn check_kubeconfig(flag: Option<&Path>) {
    let path = match resolve_kubeconfig_path(flag) {
        Ok(path) => path,
        Err(err) => {
            log::warn!("{err}");
            return;
        }
    };
    if !path.exists() {
        log::debug!("Kubeconfig {} does not exist", path.display());
        return;
    }
    if let Err(err) = Kubeconfig::load(&path) {
        log::warn!("{err}");
    }
}

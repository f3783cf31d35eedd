use crate::app::config::DEFAULT_ACCOUNT;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "gscloud", author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to the gscloud config file (defaults to <config dir>/gscloud/config.yaml)
    #[clap(long, global = true, default_value = None)]
    pub config: Option<PathBuf>,

    /// Name of the account in the config file to authenticate with
    #[clap(long, global = true, default_value = DEFAULT_ACCOUNT)]
    pub account: String,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Actions performed on the managed Kubernetes service
    Kubernetes {
        #[clap(subcommand)]
        command: KubernetesCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum KubernetesCommand {
    /// Actions performed on a Kubernetes cluster
    Cluster {
        #[clap(subcommand)]
        command: ClusterCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum ClusterCommand {
    /// Saves the configuration of the given cluster into a kubeconfig file
    SaveKubeconfig(SaveKubeconfigArgs),

    /// Provides the client credential of the given cluster to kubectl
    ExecCredential(ExecCredentialArgs),
}

#[derive(Args, Debug)]
pub struct SaveKubeconfigArgs {
    /// The cluster's UUID
    #[clap(long)]
    pub cluster: String,

    /// Path to the kubeconfig file (defaults to $KUBECONFIG, then ~/.kube/config)
    #[clap(long, default_value = None)]
    pub kubeconfig: Option<PathBuf>,

    /// Use the exec-credential plugin instead of embedding the client certificate
    #[clap(long)]
    pub credential_plugin: bool,
}

#[derive(Args, Debug)]
pub struct ExecCredentialArgs {
    /// The cluster's UUID
    #[clap(long)]
    pub cluster: String,

    /// Path to the kubeconfig file (defaults to $KUBECONFIG, then ~/.kube/config)
    #[clap(long, default_value = None)]
    pub kubeconfig: Option<PathBuf>,
}

pub fn parse_args() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod test {
    use super::*;
    use anyhow::Result;

    #[test]
    fn parses_save_kubeconfig() -> Result<()> {
        let args = CliArgs::try_parse_from([
            "gscloud",
            "kubernetes",
            "cluster",
            "save-kubeconfig",
            "--cluster",
            "xyz",
            "--credential-plugin",
        ])?;

        assert_eq!(args.account, DEFAULT_ACCOUNT);
        assert!(args.config.is_none());
        let Command::Kubernetes {
            command: KubernetesCommand::Cluster {
                command: ClusterCommand::SaveKubeconfig(save),
            },
        } = args.command
        else {
            panic!("expected save-kubeconfig");
        };
        assert_eq!(save.cluster, "xyz");
        assert!(save.credential_plugin);
        assert!(save.kubeconfig.is_none());
        Ok(())
    }

    #[test]
    fn parses_exec_plugin_arguments() -> Result<()> {
        let args = CliArgs::try_parse_from([
            "gscloud",
            "--config",
            "/etc/gscloud/config.yaml",
            "--account",
            "staging",
            "kubernetes",
            "cluster",
            "exec-credential",
            "--cluster",
            "abc",
        ])?;

        assert_eq!(args.config, Some(PathBuf::from("/etc/gscloud/config.yaml")));
        assert_eq!(args.account, "staging");
        assert!(matches!(
            args.command,
            Command::Kubernetes {
                command: KubernetesCommand::Cluster {
                    command: ClusterCommand::ExecCredential(ExecCredentialArgs { ref cluster, .. }),
                },
            } if cluster == "abc"
        ));
        Ok(())
    }

    #[test]
    fn cluster_is_required() {
        let result = CliArgs::try_parse_from(["gscloud", "kubernetes", "cluster", "exec-credential"]);
        assert!(result.is_err());
    }
}

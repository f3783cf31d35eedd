//! Reading, merging and writing kubeconfig files.
//!
//! Only the fields this tool touches are modelled. Everything else in the file
//! is carried through untouched in the `extra` maps, so merging credentials
//! into a kubeconfig shared with other tools does not lose their settings.

use crate::app::bundle::{BundleError, CredentialBundle};
use crate::app::exec_credential::EXEC_CREDENTIAL_API_VERSION;
use crate::app::files;
use serde::{Deserialize, Deserializer, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const KUBECONFIG_ENV: &str = "KUBECONFIG";

#[derive(Error, Debug)]
pub enum KubeconfigError {
    #[error("Unable to determine the home directory. Please pass the kubeconfig path with --kubeconfig.")]
    HomeDirNotFound,

    #[error("Failed to create kubeconfig {path}: {source}")]
    FailedToCreate {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read kubeconfig {path}: {source}")]
    FailedToRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse kubeconfig {path}: {source}")]
    FailedToParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Failed to serialize kubeconfig: {source}")]
    FailedToSerialize { source: serde_yaml::Error },

    #[error("Failed to write kubeconfig {path}: {source}")]
    FailedToWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    InvalidBundle(#[from] BundleError),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Kubeconfig {
    #[serde(rename = "apiVersion", default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub clusters: Vec<NamedCluster>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub users: Vec<NamedAuthInfo>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub contexts: Vec<NamedContext>,

    #[serde(rename = "current-context", default, deserialize_with = "null_as_empty")]
    pub current_context: String,

    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: Cluster,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Cluster {
    #[serde(default)]
    pub server: String,

    #[serde(
        rename = "certificate-authority-data",
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_data"
    )]
    pub certificate_authority_data: Option<Vec<u8>>,

    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct NamedAuthInfo {
    pub name: String,
    pub user: AuthInfo,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct AuthInfo {
    #[serde(
        rename = "client-certificate-data",
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_data"
    )]
    pub client_certificate_data: Option<Vec<u8>>,

    #[serde(
        rename = "client-key-data",
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_data"
    )]
    pub client_key_data: Option<Vec<u8>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecConfig>,

    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

/// Credential plugin invocation stored in a user entry.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecConfig {
    pub api_version: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interactive_mode: Option<String>,
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct NamedContext {
    pub name: String,
    pub context: Context,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Context {
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

/// How the merged user entry authenticates against the cluster.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthMode {
    /// Client certificate and key are written into the kubeconfig.
    Embedded,
    /// kubectl runs the given command to obtain credentials on demand.
    ExecPlugin(ExecConfig),
}

impl ExecConfig {
    /// Plugin entry that calls back into this tool's `exec-credential` command.
    pub fn exec_credential(command: &Path, config_path: &Path, account: &str, cluster_id: &str) -> Self {
        let config = config_path.to_string_lossy();
        let args = [
            "--config",
            &*config,
            "--account",
            account,
            "kubernetes",
            "cluster",
            "exec-credential",
            "--cluster",
            cluster_id,
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect();

        Self {
            api_version: EXEC_CREDENTIAL_API_VERSION.to_string(),
            command: command.to_string_lossy().into_owned(),
            args,
            interactive_mode: Some("Never".to_string()),
            extra: serde_yaml::Mapping::new(),
        }
    }
}

trait Named {
    fn name(&self) -> &str;
}

impl Named for NamedCluster {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for NamedAuthInfo {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for NamedContext {
    fn name(&self) -> &str {
        &self.name
    }
}

fn upsert<T: Named>(entries: &mut Vec<T>, entry: T) {
    match entries.iter_mut().find(|existing| existing.name() == entry.name()) {
        Some(existing) => *existing = entry,
        None => entries.push(entry),
    }
}

impl Kubeconfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        let mut config = self.clone();
        config.api_version.get_or_insert_with(|| "v1".to_string());
        config.kind.get_or_insert_with(|| "Config".to_string());
        serde_yaml::to_string(&config)
    }

    pub fn load(path: &Path) -> Result<Self, KubeconfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| KubeconfigError::FailedToRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents).map_err(|source| KubeconfigError::FailedToParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Atomically replaces the file at `path` with this kubeconfig.
    pub fn save(&self, path: &Path) -> Result<(), KubeconfigError> {
        let yaml = self
            .to_yaml()
            .map_err(|source| KubeconfigError::FailedToSerialize { source })?;
        files::replace_file(path, yaml.as_bytes()).map_err(|source| KubeconfigError::FailedToWrite {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Adds the bundle's first cluster and user, binds them in the bundle's context and makes
    /// that context current. Nothing is modified unless every field decodes.
    pub fn merge_bundle(&mut self, bundle: &CredentialBundle, auth: &AuthMode) -> Result<(), KubeconfigError> {
        let (cluster, user) = bundle.primary()?;
        let certificate_authority = cluster.cluster.decode_certificate_authority()?;

        let auth_info = match auth {
            AuthMode::Embedded => {
                let client = user.user.decode()?;
                AuthInfo {
                    client_certificate_data: Some(client.certificate),
                    client_key_data: Some(client.key),
                    ..AuthInfo::default()
                }
            }
            AuthMode::ExecPlugin(exec) => AuthInfo {
                exec: Some(exec.clone()),
                ..AuthInfo::default()
            },
        };

        upsert(
            &mut self.clusters,
            NamedCluster {
                name: cluster.name.clone(),
                cluster: Cluster {
                    server: cluster.cluster.server.clone(),
                    certificate_authority_data: Some(certificate_authority),
                    ..Cluster::default()
                },
            },
        );
        upsert(
            &mut self.users,
            NamedAuthInfo {
                name: user.name.clone(),
                user: auth_info,
            },
        );
        upsert(
            &mut self.contexts,
            NamedContext {
                name: bundle.current_context.clone(),
                context: Context {
                    cluster: cluster.name.clone(),
                    user: user.name.clone(),
                    ..Context::default()
                },
            },
        );
        self.current_context = bundle.current_context.clone();
        Ok(())
    }

    pub fn user(&self, name: &str) -> Option<&AuthInfo> {
        self.users.iter().find(|user| user.name == name).map(|user| &user.user)
    }

    pub fn cluster(&self, name: &str) -> Option<&Cluster> {
        self.clusters
            .iter()
            .find(|cluster| cluster.name == name)
            .map(|cluster| &cluster.cluster)
    }

    pub fn context(&self, name: &str) -> Option<&Context> {
        self.contexts
            .iter()
            .find(|context| context.name == name)
            .map(|context| &context.context)
    }
}

/// Picks the kubeconfig to modify: `--kubeconfig`, then `$KUBECONFIG`, then `~/.kube/config`.
pub fn resolve_kubeconfig_path(flag: Option<&Path>) -> Result<PathBuf, KubeconfigError> {
    resolve_path_from(flag, std::env::var_os(KUBECONFIG_ENV), dirs::home_dir())
}

fn resolve_path_from(
    flag: Option<&Path>,
    env: Option<OsString>,
    home: Option<PathBuf>,
) -> Result<PathBuf, KubeconfigError> {
    if let Some(path) = flag {
        return Ok(path.to_path_buf());
    }
    // KUBECONFIG may hold a list of files. Changes go to the first one.
    if let Some(first) = env
        .as_deref()
        .and_then(|env| std::env::split_paths(env).find(|path| !path.as_os_str().is_empty()))
    {
        return Ok(first);
    }
    home.map(|home| home.join(".kube").join("config"))
        .ok_or(KubeconfigError::HomeDirNotFound)
}

/// Creates an empty kubeconfig (and its directory) if nothing exists at `path` yet.
pub fn ensure_exists(path: &Path) -> Result<(), KubeconfigError> {
    if path.exists() {
        return Ok(());
    }
    let to_err = |source| KubeconfigError::FailedToCreate {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(to_err)?;
    }
    files::write_private_file(path, b"").map_err(to_err)
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Byte fields stored base64 encoded, as kubectl does.
mod base64_data {
    use crate::app::bundle::decode_base64;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| decode_base64(&encoded).map_err(serde::de::Error::custom))
            .transpose()
    }
}

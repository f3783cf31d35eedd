use crate::app::bundle::BundleError;
use crate::app::cache::{CacheError, CredentialCache};
use crate::app::gridscale::{CredentialProvider, ProviderError};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const EXEC_CREDENTIAL_KIND: &str = "ExecCredential";
pub const EXEC_CREDENTIAL_API_VERSION: &str = "client.authentication.k8s.io/v1beta1";

/// How long a freshly fetched credential is served from the cache.
///
/// The provider does not report the validity of the certificates it issues, so
/// this is a local policy. If the real certificate lifetime is shorter, kubectl
/// will be handed an already rotated certificate until the cache entry expires.
pub const CREDENTIAL_LIFETIME: Duration = Duration::hours(1);

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ExecCredential {
    pub kind: String,
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    #[serde(default)]
    pub spec: ExecCredentialSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ExecCredentialStatus>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ExecCredentialSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interactive: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecCredentialStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_certificate_data: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_key_data: String,
}

impl ExecCredential {
    pub fn new(
        client_certificate_data: String,
        client_key_data: String,
        expiration_timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            kind: EXEC_CREDENTIAL_KIND.to_string(),
            api_version: EXEC_CREDENTIAL_API_VERSION.to_string(),
            spec: ExecCredentialSpec::default(),
            status: Some(ExecCredentialStatus {
                expiration_timestamp,
                client_certificate_data,
                client_key_data,
            }),
        }
    }

    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        self.status.as_ref()?.expiration_timestamp
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Error, Debug)]
pub enum ExecCredentialError {
    #[error("Could not retrieve kubeconfig from provider for account: {account}")]
    NoCredentials { account: String },

    #[error("Failed to fetch credentials for cluster {cluster_id}: {source}")]
    FailedToFetch {
        cluster_id: String,
        source: ProviderError,
    },

    #[error(transparent)]
    InvalidBundle(#[from] BundleError),

    #[error("Client credential returned by the provider is not UTF-8 PEM data")]
    NotUtf8 { source: std::string::FromUtf8Error },

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Serves exec credentials from the cache, falling back to the provider on a miss.
pub struct CredentialCacheManager<'a, P: CredentialProvider + ?Sized> {
    provider: &'a P,
    cache: CredentialCache,
    account: String,
}

impl<'a, P: CredentialProvider + ?Sized> CredentialCacheManager<'a, P> {
    pub fn new(provider: &'a P, cache: CredentialCache, account: impl Into<String>) -> Self {
        Self {
            provider,
            cache,
            account: account.into(),
        }
    }

    pub async fn exec_credential(
        &self,
        cluster_id: &str,
    ) -> Result<ExecCredential, ExecCredentialError> {
        // The id names the cache file, reject it before asking the provider.
        self.cache.path_for(cluster_id)?;

        // An unreadable cache only costs a fetch.
        match self.cache.load(cluster_id) {
            Ok(lookup) => {
                if let Some(credential) = lookup.into_credential() {
                    return Ok(credential);
                }
            }
            Err(err) => log::warn!("{err}"),
        }

        let credential = self.fetch(cluster_id).await?;
        if let Err(err) = self.cache.store(cluster_id, &credential) {
            log::warn!("{err}");
        }
        Ok(credential)
    }

    async fn fetch(&self, cluster_id: &str) -> Result<ExecCredential, ExecCredentialError> {
        let bundle = self
            .provider
            .fetch_credentials(cluster_id)
            .await
            .map_err(|source| ExecCredentialError::FailedToFetch {
                cluster_id: cluster_id.to_string(),
                source,
            })?;

        let user = bundle
            .first_user()
            .map_err(|_| ExecCredentialError::NoCredentials {
                account: self.account.clone(),
            })?;
        let client = user.user.decode()?;

        let expires_at = Utc::now().trunc_subsecs(0) + CREDENTIAL_LIFETIME;
        Ok(ExecCredential::new(
            pem_string(client.certificate)?,
            pem_string(client.key)?,
            Some(expires_at),
        ))
    }
}

fn pem_string(bytes: Vec<u8>) -> Result<String, ExecCredentialError> {
    String::from_utf8(bytes).map_err(|source| ExecCredentialError::NotUtf8 { source })
}

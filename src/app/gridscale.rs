use crate::app::bundle::{BundleError, CredentialBundle};
use crate::app::config::Account;
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use thiserror::Error;

const PAAS_SERVICE_BASE: &str = "objects/paas/services";
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Source of Kubernetes credentials for a managed cluster.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Renews the cluster's credentials and returns the issued kubeconfig.
    async fn fetch_credentials(&self, cluster_id: &str) -> Result<CredentialBundle, ProviderError>;
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Account field for header {header} is not a valid header value: {source}")]
    InvalidCredentialHeader {
        header: &'static str,
        source: reqwest::header::InvalidHeaderValue,
    },

    #[error("Failed to build the HTTP client: {source}")]
    FailedToBuildClient { source: reqwest::Error },

    #[error("Request {method} {url} failed: {source}")]
    RequestFailed {
        method: Method,
        url: String,
        source: reqwest::Error,
    },

    #[error("Request {method} {url} returned {status}: {body}")]
    UnexpectedStatus {
        method: Method,
        url: String,
        status: StatusCode,
        body: String,
    },

    #[error("Failed to parse response of {url}: {source}")]
    FailedToParseResponse { url: String, source: reqwest::Error },

    #[error(transparent)]
    InvalidKubeconfig(#[from] BundleError),
}

#[derive(Debug, Deserialize)]
struct PaasServiceResponse {
    paas_service: PaasService,
}

#[derive(Debug, Default, Deserialize)]
struct PaasService {
    #[serde(default)]
    credentials: Vec<PaasCredential>,
}

#[derive(Debug, Deserialize)]
struct PaasCredential {
    #[serde(default)]
    kubeconfig: String,
}

/// Client for the gridscale PaaS API.
pub struct GridscaleClient {
    http: reqwest::Client,
    base_url: String,
}

impl GridscaleClient {
    pub fn new(account: &Account) -> Result<Self, ProviderError> {
        let mut headers = reqwest::header::HeaderMap::new();
        for (name, value) in [("X-Auth-UserId", &account.user_id), ("X-Auth-Token", &account.token)] {
            let mut value = reqwest::header::HeaderValue::from_str(value)
                .map_err(|source| ProviderError::InvalidCredentialHeader { header: name, source })?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|source| ProviderError::FailedToBuildClient { source })?;

        Ok(Self {
            http,
            base_url: account.url.trim_end_matches('/').to_string(),
        })
    }

    fn service_url(&self, cluster_id: &str) -> String {
        format!("{}/{PAAS_SERVICE_BASE}/{cluster_id}", self.base_url)
    }

    async fn send(&self, method: Method, url: &str) -> Result<reqwest::Response, ProviderError> {
        log::debug!("{method} {url}");
        let response = self
            .http
            .request(method.clone(), url)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|source| ProviderError::RequestFailed {
                method: method.clone(),
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::UnexpectedStatus {
                method,
                url: url.to_string(),
                status,
                body,
            });
        }
        Ok(response)
    }

    pub async fn renew_credentials(&self, cluster_id: &str) -> Result<(), ProviderError> {
        let url = format!("{}/renew_credentials", self.service_url(cluster_id));
        self.send(Method::PATCH, &url).await?;
        Ok(())
    }

    /// Reads the kubeconfig of the service's first credential. No credential yields an empty bundle.
    pub async fn service_kubeconfig(&self, cluster_id: &str) -> Result<CredentialBundle, ProviderError> {
        let url = self.service_url(cluster_id);
        let service: PaasServiceResponse = self
            .send(Method::GET, &url)
            .await?
            .json()
            .await
            .map_err(|source| ProviderError::FailedToParseResponse {
                url: url.clone(),
                source,
            })?;

        match service.paas_service.credentials.first() {
            Some(credential) => Ok(CredentialBundle::from_yaml(&credential.kubeconfig)?),
            None => Ok(CredentialBundle::default()),
        }
    }
}

#[async_trait]
impl CredentialProvider for GridscaleClient {
    async fn fetch_credentials(&self, cluster_id: &str) -> Result<CredentialBundle, ProviderError> {
        self.renew_credentials(cluster_id).await?;
        self.service_kubeconfig(cluster_id).await
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hands out the same bundle on every call and counts the calls.
    pub(crate) struct FakeProvider {
        bundle: CredentialBundle,
        calls: AtomicUsize,
    }

    impl FakeProvider {
        pub(crate) fn new(bundle: CredentialBundle) -> Self {
            Self {
                bundle,
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CredentialProvider for FakeProvider {
        async fn fetch_credentials(&self, _cluster_id: &str) -> Result<CredentialBundle, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.bundle.clone())
        }
    }

    /// Rejects every request the way the API does for a revoked token.
    pub(crate) struct FailingProvider;

    #[async_trait]
    impl CredentialProvider for FailingProvider {
        async fn fetch_credentials(&self, cluster_id: &str) -> Result<CredentialBundle, ProviderError> {
            Err(ProviderError::UnexpectedStatus {
                method: Method::PATCH,
                url: format!("https://api.gridscale.test/objects/paas/services/{cluster_id}/renew_credentials"),
                status: StatusCode::FORBIDDEN,
                body: String::new(),
            })
        }
    }
}

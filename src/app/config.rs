use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_API_URL: &str = "https://api.gridscale.io";
pub const DEFAULT_ACCOUNT: &str = "default";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to determine the user's config directory. Please pass the config file with --config.")]
    ConfigDirNotFound,

    #[error("Unable to determine the current directory: {source}")]
    CurrentDirUnavailable { source: std::io::Error },

    #[error("Failed to read config file {path}: {source}")]
    FailedToRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    FailedToParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Account {account} is not configured in {path}")]
    AccountNotFound { account: String, path: PathBuf },
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub accounts: Vec<Account>,
}

/// API credentials of one gridscale account.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub name: String,
    pub user_id: String,
    pub token: String,
    #[serde(default = "default_api_url")]
    pub url: String,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

/// Everything a command needs to know about who is calling and where the tool keeps its files.
#[derive(Debug, Clone)]
pub struct AppContext {
    /// Absolute path of the config file, reused in exec plugin arguments and for the cache location.
    pub config_path: PathBuf,
    pub account: Account,
}

impl AppContext {
    pub fn load(config_path: Option<&Path>, account: &str) -> Result<Self, ConfigError> {
        let config_path = match config_path {
            Some(path) => absolute(path)?,
            None => default_config_path()?,
        };

        let contents = std::fs::read_to_string(&config_path).map_err(|source| {
            ConfigError::FailedToRead {
                path: config_path.clone(),
                source,
            }
        })?;
        let config = ConfigFile::from_yaml(&contents).map_err(|source| ConfigError::FailedToParse {
            path: config_path.clone(),
            source,
        })?;

        let account = config
            .account(account)
            .cloned()
            .ok_or_else(|| ConfigError::AccountNotFound {
                account: account.to_string(),
                path: config_path.clone(),
            })?;

        Ok(Self {
            config_path,
            account,
        })
    }
}

impl ConfigFile {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
    }

    pub fn account(&self, name: &str) -> Option<&Account> {
        self.accounts.iter().find(|account| account.name == name)
    }
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let dir = dirs::config_dir().ok_or(ConfigError::ConfigDirNotFound)?;
    Ok(dir.join("gscloud").join("config.yaml"))
}

fn absolute(path: &Path) -> Result<PathBuf, ConfigError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()
        .map_err(|source| ConfigError::CurrentDirUnavailable { source })?;
    Ok(cwd.join(path))
}

#[cfg(test)]
mod test {
    use super::*;
    use anyhow::Result;

    const CONFIG: &str = r#"
accounts:
  - name: default
    userId: 0d5b3a2e-0000-4000-8000-000000000001
    token: default-token
  - name: staging
    userId: 0d5b3a2e-0000-4000-8000-000000000002
    token: staging-token
    url: https://api.staging.example
"#;

    #[test]
    fn selects_account_by_name() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, CONFIG)?;

        let ctx = AppContext::load(Some(&path), "staging")?;
        assert_eq!(ctx.config_path, path);
        assert_eq!(ctx.account.token, "staging-token");
        assert_eq!(ctx.account.url, "https://api.staging.example");

        let ctx = AppContext::load(Some(&path), DEFAULT_ACCOUNT)?;
        assert_eq!(ctx.account.url, DEFAULT_API_URL);
        Ok(())
    }

    #[test]
    fn unknown_account_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, CONFIG)?;

        let err = AppContext::load(Some(&path), "production").unwrap_err();
        assert!(matches!(err, ConfigError::AccountNotFound { ref account, .. } if account == "production"));
        Ok(())
    }

    #[test]
    fn missing_config_file_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let err = AppContext::load(Some(&dir.path().join("nope.yaml")), DEFAULT_ACCOUNT).unwrap_err();
        assert!(matches!(err, ConfigError::FailedToRead { .. }));
        Ok(())
    }

    #[test]
    fn empty_config_has_no_accounts() -> Result<()> {
        let config = ConfigFile::from_yaml("\n")?;
        assert!(config.account(DEFAULT_ACCOUNT).is_none());
        Ok(())
    }

    #[test]
    fn relative_config_path_is_made_absolute() -> Result<()> {
        let path = absolute(Path::new("gscloud.yaml"))?;
        assert!(path.is_absolute());
        assert!(path.ends_with("gscloud.yaml"));
        Ok(())
    }
}

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use nutriledger_core::models::UserProfile;

/// Remote mirror settings. Sync is enabled when `url` is set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    /// Defaults to this installation's device id.
    pub user_id: Option<String>,
}

impl SyncConfig {
    pub fn is_configured(&self) -> bool {
        self.url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    profile: Option<UserProfile>,
    sync: Option<SyncConfig>,
}

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
    pub config_file: Option<PathBuf>,
    pub profile: UserProfile,
    pub sync: SyncConfig,
}

impl Config {
    /// Load with priority: env vars > config file > defaults.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let proj_dirs = ProjectDirs::from("", "", "nutriledger")
            .context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let path = config_path.unwrap_or_else(|| proj_dirs.config_dir().join("config.yaml"));
        let mut config = Self::from_file(&path, data_dir)?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn from_file(path: &Path, data_dir: PathBuf) -> Result<Self> {
        let mut config = Config {
            db_path: data_dir.join("nutriledger.db"),
            data_dir,
            config_file: None,
            profile: UserProfile::default(),
            sync: SyncConfig::default(),
        };

        if !path.exists() {
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        let file: ConfigFile = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file '{}'", path.display()))?;

        if let Some(db_path) = file.database_path {
            // Relative paths are relative to the config file
            config.db_path = if db_path.is_relative() {
                path.parent().map_or(db_path.clone(), |p| p.join(&db_path))
            } else {
                db_path
            };
        }
        if let Some(profile) = file.profile {
            config.profile = profile;
        }
        if let Some(sync) = file.sync {
            config.sync = sync;
        }
        config.config_file = Some(path.to_path_buf());
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(db) = lookup("NUTRILEDGER_DB") {
            self.db_path = PathBuf::from(db);
        }
        if let Some(url) = lookup("NUTRILEDGER_SYNC_URL") {
            self.sync.url = Some(url);
        }
        if let Some(key) = lookup("NUTRILEDGER_SYNC_API_KEY") {
            self.sync.api_key = Some(key);
        }
    }

    /// Load the API key from disk, or generate a new one.
    ///
    /// Returns `(key, newly_created)` where `newly_created` is true when a
    /// fresh key was just generated (first run).
    pub fn load_or_create_api_key(&self) -> Result<(String, bool)> {
        use rand::Rng;
        use std::fmt::Write;

        let path = self.data_dir.join("api_key");

        if path.exists() {
            let key = std::fs::read_to_string(&path).context("Failed to read API key file")?;
            let key = key.trim().to_string();
            if !key.is_empty() {
                return Ok((key, false));
            }
        }

        let bytes: [u8; 32] = rand::rng().random();
        let key = bytes
            .iter()
            .fold(String::with_capacity(64), |mut acc: String, b| {
                let _ = write!(acc, "{b:02x}");
                acc
            });
        std::fs::write(&path, &key).context("Failed to write API key file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set API key file permissions")?;
        }
        eprintln!("Generated new API key: {key}");
        eprintln!("Include in requests: Authorization: Bearer {key}");
        Ok((key, true))
    }
}

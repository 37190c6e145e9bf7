use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::utils::auth::DEFAULT_TOKEN_TIMEOUT_MS;

/// Where folder operations are carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderMode {
    /// Operate on `folder_root` directly.
    Local,
    /// Forward every operation to `remote_endpoint`.
    Delegate,
}

impl FromStr for FolderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(FolderMode::Local),
            "delegate" | "remote" => Ok(FolderMode::Delegate),
            other => Err(format!("unknown folder mode '{}'", other)),
        }
    }
}

impl std::fmt::Display for FolderMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FolderMode::Local => f.write_str("local"),
            FolderMode::Delegate => f.write_str("delegate"),
        }
    }
}

/// Folder service configuration
#[derive(Debug, Clone)]
pub struct FolderConfig {
    /// Physical root every folder key maps under (default: "./wwwroot")
    pub folder_root: PathBuf,

    /// Where chunked uploads accumulate until their final part (default: "./staging")
    pub staging_dir: PathBuf,

    pub mode: FolderMode,

    /// Base URL of the remote folder service, e.g. "http://files:3000/remote"
    pub remote_endpoint: Option<String>,

    /// Shared secret for signed requests
    pub secret_key: String,

    /// Signed request validity window (default: 15000 ms)
    pub token_timeout_ms: i64,

    /// Maximum request body size in bytes (default: 256 MB)
    pub max_upload_size: usize,

    /// Store uploads under URL-friendly names (default: true)
    pub slugify_names: bool,

    /// Abandoned staging files older than this are removed (default: 24 h)
    pub staging_retention: Duration,

    pub staging_sweep_interval: Duration,

    /// CORS origins; "*" allows any
    pub allowed_origins: Vec<String>,
}

impl Default for FolderConfig {
    fn default() -> Self {
        Self {
            folder_root: PathBuf::from("./wwwroot"),
            staging_dir: PathBuf::from("./staging"),
            mode: FolderMode::Local,
            remote_endpoint: None,
            secret_key: String::new(),
            token_timeout_ms: DEFAULT_TOKEN_TIMEOUT_MS,
            max_upload_size: 256 * 1024 * 1024, // 256 MB
            slugify_names: true,
            staging_retention: Duration::from_secs(24 * 3600),
            staging_sweep_interval: Duration::from_secs(3600),
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

impl FolderConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            folder_root: env::var("FOLDER_ROOT")
                .map(PathBuf::from)
                .unwrap_or(default.folder_root),

            staging_dir: env::var("STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.staging_dir),

            mode: env::var("FOLDER_MODE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.mode),

            remote_endpoint: env::var("REMOTE_ENDPOINT")
                .ok()
                .filter(|v| !v.trim().is_empty()),

            secret_key: env::var("SECRET_KEY").unwrap_or(default.secret_key),

            token_timeout_ms: env::var("TOKEN_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.token_timeout_ms),

            max_upload_size: env::var("MAX_UPLOAD_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_upload_size),

            slugify_names: env::var("SLUGIFY_NAMES")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(default.slugify_names),

            staging_retention: env::var("STAGING_RETENTION_HOURS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(|h| Duration::from_secs(h.saturating_mul(3600)))
                .unwrap_or(default.staging_retention),

            staging_sweep_interval: env::var("STAGING_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.staging_sweep_interval),

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(default.allowed_origins),
        }
    }

    /// Local mode under `root`, with a fixed development secret and any
    /// CORS origin.
    pub fn development(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            staging_dir: root.join(".staging"),
            folder_root: root,
            secret_key: "development-secret".to_string(),
            allowed_origins: vec!["*".to_string()],
            ..Self::default()
        }
    }

    /// Refuses configurations the service cannot start with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.secret_key.trim().is_empty() {
            anyhow::bail!("SECRET_KEY must be set");
        }
        if self.token_timeout_ms <= 0 {
            anyhow::bail!("TOKEN_TIMEOUT_MS must be positive");
        }
        if self.staging_sweep_interval.is_zero() {
            anyhow::bail!("STAGING_SWEEP_INTERVAL_SECS must be positive");
        }
        if self.mode == FolderMode::Delegate && self.remote_endpoint.is_none() {
            anyhow::bail!("REMOTE_ENDPOINT is required in delegate mode");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FolderConfig::default();
        assert_eq!(config.folder_root, PathBuf::from("./wwwroot"));
        assert_eq!(config.mode, FolderMode::Local);
        assert_eq!(config.token_timeout_ms, 15_000);
        assert_eq!(config.max_upload_size, 256 * 1024 * 1024);
        assert!(config.slugify_names);
        assert_eq!(config.staging_retention, Duration::from_secs(86_400));
    }

    #[test]
    fn test_default_config_needs_a_secret() {
        let err = FolderConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("SECRET_KEY"));
    }

    #[test]
    fn test_development_config() {
        let config = FolderConfig::development("/tmp/folders");
        assert!(config.validate().is_ok());
        assert_eq!(config.staging_dir, PathBuf::from("/tmp/folders/.staging"));
        assert_eq!(config.allowed_origins, vec!["*".to_string()]);
    }

    #[test]
    fn test_delegate_mode_needs_endpoint() {
        let mut config = FolderConfig::development("/tmp/folders");
        config.mode = FolderMode::Delegate;
        assert!(config.validate().is_err());

        config.remote_endpoint = Some("http://files:3000/remote".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("Local".parse::<FolderMode>(), Ok(FolderMode::Local));
        assert_eq!(" delegate ".parse::<FolderMode>(), Ok(FolderMode::Delegate));
        assert!("s3".parse::<FolderMode>().is_err());
        assert_eq!(FolderMode::Delegate.to_string(), "delegate");
    }

    #[test]
    fn test_from_env() {
        // SAFETY: only this test touches these variables.
        unsafe {
            env::set_var("TOKEN_TIMEOUT_MS", "5000");
            env::set_var("SLUGIFY_NAMES", "false");
            env::set_var("ALLOWED_ORIGINS", "https://a.example, https://b.example,");
            env::set_var("STAGING_RETENTION_HOURS", u64::MAX.to_string());
        }

        let config = FolderConfig::from_env();
        assert_eq!(config.token_timeout_ms, 5000);
        assert!(!config.slugify_names);
        assert_eq!(config.staging_retention, Duration::from_secs(u64::MAX));
        assert_eq!(
            config.allowed_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );

        unsafe {
            env::remove_var("TOKEN_TIMEOUT_MS");
            env::remove_var("SLUGIFY_NAMES");
            env::remove_var("ALLOWED_ORIGINS");
            env::remove_var("STAGING_RETENTION_HOURS");
        }
    }
}

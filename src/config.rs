//! Configuration loaded from `demoforge.toml`.
//!
//! Every field has a default, so a missing file or a partial one is fine.
//! `ANTHROPIC_API_KEY` and `DEMOFORGE_HOSTING_TOKEN` take precedence over
//! the file; `DEMOFORGE_CONFIG` points at a different file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::audit::AuditSettings;
use crate::content::ContentSettings;
use crate::deploy::PlannerSettings;
use crate::error::DemoforgeError;
use crate::orchestrator::OrchestratorSettings;
use crate::provisioning::ProvisioningSettings;
use crate::retry::RetryPolicy;
use crate::scan::ScanSettings;
use crate::state_machine::ResubmitPolicy;

const DEFAULT_PATH: &str = "demoforge.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DemoforgeConfig {
    /// Anthropic API key.
    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    #[serde(default)]
    pub deploy: PlannerSettings,

    #[serde(default)]
    pub hosting: HostingConfig,

    #[serde(default)]
    pub content: ContentSettings,

    #[serde(default)]
    pub scan: ScanSettings,

    #[serde(default)]
    pub audit: AuditSettings,

    #[serde(default)]
    pub resubmit: ResubmitPolicy,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostingConfig {
    /// Base URL of the hosting control plane API.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default)]
    pub token: String,

    /// Timeout for control-plane and status calls.
    #[serde(default = "default_status_timeout_secs")]
    pub status_timeout_secs: u64,

    /// Timeout for one whole upload session.
    #[serde(default = "default_transfer_timeout_secs")]
    pub transfer_timeout_secs: u64,

    /// Local mount of the remote document roots.
    #[serde(default = "default_mirror_root")]
    pub mirror_root: PathBuf,

    /// Run blueprint post-install commands in the mirrored root.
    #[serde(default)]
    pub allow_exec: bool,

    #[serde(default = "default_url_scheme")]
    pub url_scheme: String,

    #[serde(default = "default_max_html_bytes")]
    pub max_html_bytes: usize,
}

fn default_api_url() -> String {
    "http://127.0.0.1:8088".to_string()
}

fn default_status_timeout_secs() -> u64 {
    10
}

fn default_transfer_timeout_secs() -> u64 {
    120
}

fn default_mirror_root() -> PathBuf {
    PathBuf::from("sites")
}

fn default_url_scheme() -> String {
    "https".to_string()
}

fn default_max_html_bytes() -> usize {
    2 * 1024 * 1024
}

impl Default for HostingConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token: String::new(),
            status_timeout_secs: default_status_timeout_secs(),
            transfer_timeout_secs: default_transfer_timeout_secs(),
            mirror_root: default_mirror_root(),
            allow_exec: false,
            url_scheme: default_url_scheme(),
            max_html_bytes: default_max_html_bytes(),
        }
    }
}

impl HostingConfig {
    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }

    pub fn provisioning_settings(&self, retry: &RetryPolicy) -> ProvisioningSettings {
        ProvisioningSettings {
            retry: retry.clone(),
            max_html_bytes: self.max_html_bytes,
            transfer_timeout: Duration::from_secs(self.transfer_timeout_secs),
            url_scheme: self.url_scheme.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// JSON file holding jobs and auditors.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Keep everything in memory; nothing survives a restart.
    #[serde(default)]
    pub in_memory: bool,

    /// Attempts per conditional write before giving up.
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("demoforge-data.json")
}

fn default_conflict_retries() -> u32 {
    8
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            in_memory: false,
            conflict_retries: default_conflict_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl DemoforgeConfig {
    /// Load from `path`, else `$DEMOFORGE_CONFIG`, else `demoforge.toml` in
    /// the current directory. Only the implicit default file may be missing.
    pub fn load(path: Option<&Path>) -> Result<Self, DemoforgeError> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("DEMOFORGE_CONFIG").map(PathBuf::from));
        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None if Path::new(DEFAULT_PATH).exists() => Self::from_file(Path::new(DEFAULT_PATH))?,
            None => Self::default(),
        };

        // Environment wins over the file for secrets.
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY")
            && !key.is_empty()
        {
            config.api_key = key;
        }
        if let Ok(token) = std::env::var("DEMOFORGE_HOSTING_TOKEN")
            && !token.is_empty()
        {
            config.hosting.token = token;
        }

        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, DemoforgeError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            DemoforgeError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(toml::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = DemoforgeConfig::default();
        assert!(config.api_key.is_empty());
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.orchestrator.max_concurrent_provisioning, 2);
        assert_eq!(config.deploy.base_domain_suffix, "demo.localtest.me");
        assert_eq!(config.hosting.status_timeout_secs, 10);
        assert_eq!(config.hosting.transfer_timeout_secs, 120);
        assert_eq!(config.store.conflict_retries, 8);
        assert!(config.resubmit.enabled);
        assert!(!config.audit.assign_any_status);
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            api_key = "sk-test-123"

            [retry]
            max_attempts = 6

            [deploy]
            base_domain_suffix = "preview.example.net"

            [resubmit]
            max_resubmits = 5
            automatic = true
        "#;
        let config: DemoforgeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.api_key, "sk-test-123");
        assert_eq!(config.retry.max_attempts, 6);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.deploy.base_domain_suffix, "preview.example.net");
        assert!(config.deploy.verify);
        assert_eq!(config.resubmit.max_resubmits, 5);
        assert!(config.resubmit.automatic);
        assert_eq!(config.orchestrator.poll_interval_ms, 2000);
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[orchestrator]\nbatch_size = 3\n").unwrap();
        let config = DemoforgeConfig::load(Some(&path)).unwrap();
        assert_eq!(config.orchestrator.batch_size, 3);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DemoforgeConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, DemoforgeError::Config(_)));
    }

    #[test]
    fn invalid_toml_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[retry\nmax_attempts = 1").unwrap();
        assert!(matches!(
            DemoforgeConfig::load(Some(&path)).unwrap_err(),
            DemoforgeError::Toml(_)
        ));
    }
}

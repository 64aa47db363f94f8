use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scanner: ScannerConfig,
    pub http: HttpConfig,
    pub crawler: CrawlerConfig,
    pub reporting: ReportingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub launcher: String,
    pub image: String,
    /// Host name a container uses to reach services bound on the host loopback
    pub host_alias: String,
    pub job_tag_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout: u64,  // seconds
    pub delay_ms: u64, // milliseconds between sequential requests
    pub user_agent: String,
    pub authz_header: String,
    pub authz_value: String,
    pub max_redirects: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    pub enabled: bool,
    pub max_pages: usize,
    pub max_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    pub output_dir: PathBuf,
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Csv,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            launcher: "docker".to_string(),
            image: "ghcr.io/sullo/nikto:latest".to_string(),
            host_alias: "host.docker.internal".to_string(),
            job_tag_prefix: "VX_Rec0nJob".to_string(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: 8,
            delay_ms: 0,
            user_agent: "VX_Rec0n".to_string(),
            authz_header: "X-Scan-Authorized".to_string(),
            authz_value: "TICKET-REQUIRED".to_string(),
            max_redirects: 10,
        }
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_pages: 60,
            max_depth: 2,
        }
    }
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./reports"),
            format: OutputFormat::Json,
        }
    }
}

impl Config {
    pub const ENV_PREFIX: &'static str = "VXRECON";

    /// Load from a TOML file, then let `VXRECON_<SECTION>__<KEY>` environment
    /// variables override individual values.
    pub fn load_from_file(path: &str) -> crate::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(Self::environment())
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Defaults plus environment overrides, for runs without a config file.
    pub fn from_env() -> crate::Result<Self> {
        let settings = config::Config::builder()
            .add_source(Self::environment())
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix(Self::ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    pub fn save_to_file(&self, path: &str) -> crate::Result<()> {
        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| config::ConfigError::Message(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.http.delay_ms)
    }
}

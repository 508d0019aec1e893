//! Configuration management
//!
//! Settings are read from a TOML file and layered with `WANSTATUS_*`
//! environment variables, so device credentials can be kept out of the file.
//! The service loop re-reads the file whenever its modification time changes.

use crate::error::ConfigError;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const CONFIG_FILE: &str = "wanstatus.toml";
const ENV_PREFIX: &str = "WANSTATUS";

/// Upper bound for every recheck period and delay
pub const MAX_PERIOD: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Scheduling and persistence settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// How internet reachability is probed
    #[serde(default)]
    pub internet_access: InternetAccessConfig,

    /// Router status page (WAN IP source); absent disables router polling
    #[serde(default)]
    pub router: Option<DeviceConfig>,

    /// Modem status page (diagnostics only); absent disables modem polling
    #[serde(default)]
    pub modem: Option<DeviceConfig>,

    /// Third-party "what is my IP" page
    #[serde(default)]
    pub external_wan_ip: Option<ExternalIpConfig>,

    /// Notification routing
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Global service settings
#[derive(Debug, Deserialize, Clone)]
pub struct GlobalConfig {
    /// Attempts per target / request before giving up
    #[serde(default = "default_n_retries")]
    pub n_retries: u32,

    #[serde(default = "default_status_recheck", deserialize_with = "duration")]
    pub status_recheck_period: Duration,

    #[serde(default = "default_external_recheck", deserialize_with = "duration")]
    pub external_wan_recheck_period: Duration,

    #[serde(default = "default_outage_recheck", deserialize_with = "duration")]
    pub outage_recheck_period: Duration,

    /// Wait after reachability returns before the outage is declared over
    #[serde(default = "default_recovery_delay", deserialize_with = "duration")]
    pub recovery_delay: Duration,

    /// Last known WAN IP; relative paths live under the user data dir
    #[serde(default = "default_wan_ip_file")]
    pub wan_ip_file: PathBuf,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            n_retries: default_n_retries(),
            status_recheck_period: default_status_recheck(),
            external_wan_recheck_period: default_external_recheck(),
            outage_recheck_period: default_outage_recheck(),
            recovery_delay: default_recovery_delay(),
            wan_ip_file: default_wan_ip_file(),
        }
    }
}

impl GlobalConfig {
    /// Resolve `wan_ip_file` against the data directory
    pub fn wan_ip_path(&self) -> PathBuf {
        if self.wan_ip_file.is_absolute() {
            return self.wan_ip_file.clone();
        }
        dirs::data_dir()
            .map(|d| d.join("wanstatus").join(&self.wan_ip_file))
            .unwrap_or_else(|| self.wan_ip_file.clone())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InternetAccessConfig {
    /// `ping` or `dns`, case-insensitive
    #[serde(default = "default_check_method")]
    pub method: String,

    #[serde(default = "default_probe_addrs")]
    pub ping_addrs: Vec<String>,

    /// Round-trip times at or above this many milliseconds count as down
    #[serde(default = "default_ping_max_time")]
    pub ping_max_time: f64,

    #[serde(default = "default_probe_addrs")]
    pub dns_addrs: Vec<String>,

    #[serde(default = "default_dns_timeout", deserialize_with = "duration")]
    pub dns_timeout: Duration,
}

impl Default for InternetAccessConfig {
    fn default() -> Self {
        Self {
            method: default_check_method(),
            ping_addrs: default_probe_addrs(),
            ping_max_time: default_ping_max_time(),
            dns_addrs: default_probe_addrs(),
            dns_timeout: default_dns_timeout(),
        }
    }
}

/// Settings for one router or modem admin page
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    /// Page the status regex is applied to
    pub status_page: String,

    /// Pattern whose first group is the value of interest (WAN IP, link state)
    pub status_re: String,

    /// Page credentials are posted to; when absent the status page is simply re-fetched
    #[serde(default)]
    pub login_page: Option<String>,

    /// Text only present on pages served to a logged-out client
    #[serde(default)]
    pub login_required_text: Option<String>,

    /// Form field for the username; when absent no credentials are sent
    #[serde(default)]
    pub username_field: Option<String>,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password_field: String,

    #[serde(default)]
    pub password: String,

    /// Extra form fields as `key:value, key:value`; a key containing
    /// "csrf" turns on token tracking
    #[serde(default)]
    pub additional_keys: String,

    /// Pattern capturing the anti-forgery token from returned pages
    #[serde(default)]
    pub csrf_re: String,

    #[serde(default = "default_device_timeout", deserialize_with = "duration")]
    pub timeout: Duration,

    /// Overrides `global.n_retries` for this device
    #[serde(default)]
    pub retries: Option<u32>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            status_page: String::new(),
            status_re: String::new(),
            login_page: None,
            login_required_text: None,
            username_field: None,
            username: String::new(),
            password_field: String::new(),
            password: String::new(),
            additional_keys: String::new(),
            csrf_re: String::new(),
            timeout: default_device_timeout(),
            retries: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExternalIpConfig {
    pub url: String,

    /// Pattern whose first group is the reported IP
    pub re: String,

    #[serde(default = "default_device_timeout", deserialize_with = "duration")]
    pub timeout: Duration,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifyConfig {
    /// Webhook URLs receiving a JSON `{subject, body}` POST
    #[serde(default)]
    pub notif_list: Vec<String>,

    /// Mail recipients, delivered through `mailer`
    #[serde(default)]
    pub email_to: Vec<String>,

    /// sendmail-compatible command
    #[serde(default = "default_mailer")]
    pub mailer: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            notif_list: Vec::new(),
            email_to: Vec::new(),
            mailer: default_mailer(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file used in service mode
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Lines shown by `--print-log`
    #[serde(default = "default_print_log_length")]
    pub print_log_length: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_file: None,
            print_log_length: default_print_log_length(),
        }
    }
}

// Default value functions
fn default_n_retries() -> u32 {
    3
}

fn default_status_recheck() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_external_recheck() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_outage_recheck() -> Duration {
    Duration::from_secs(10)
}

fn default_recovery_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_wan_ip_file() -> PathBuf {
    PathBuf::from("wanip.txt")
}

fn default_check_method() -> String {
    "ping".to_string()
}

fn default_probe_addrs() -> Vec<String> {
    vec!["8.8.8.8".to_string(), "1.1.1.1".to_string()]
}

fn default_ping_max_time() -> f64 {
    100.0
}

fn default_dns_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_device_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_mailer() -> String {
    "sendmail".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_print_log_length() -> usize {
    40
}

/// Accepts humantime strings ("90s", "10m", "1h 30m") or bare seconds
fn duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    if let Ok(secs) = text.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(text).map_err(|e| format!("invalid duration <{text}>: {e}"))
}

impl Config {
    /// Pick the config file: the explicit path, or the first existing default location
    pub fn locate(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
        if let Some(path) = explicit {
            if path.is_file() {
                return Ok(path.to_path_buf());
            }
            return Err(ConfigError::Missing(path.to_path_buf()));
        }

        let mut candidates = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("wanstatus").join(CONFIG_FILE));
        }
        candidates.push(PathBuf::from("/etc/wanstatus").join(CONFIG_FILE));

        for path in &candidates {
            if path.is_file() {
                tracing::debug!("Loading config from: {}", path.display());
                return Ok(path.clone());
            }
        }

        let searched: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
        Err(ConfigError::NotFound(searched.join(", ")))
    }

    /// Load and validate the file, with `WANSTATUS_*` environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with_env(path, Some(ENV_PREFIX))
    }

    /// Load the file, overlaid with `{env_prefix}_SECTION__KEY` variables when a prefix is given
    fn load_with_env(path: &Path, env_prefix: Option<&str>) -> Result<Self, ConfigError> {
        let load_err = |source| ConfigError::Load {
            path: path.to_path_buf(),
            source,
        };

        let mut builder = config::Config::builder().add_source(config::File::new(
            &path.to_string_lossy(),
            config::FileFormat::Toml,
        ));
        if let Some(prefix) = env_prefix {
            builder = builder.add_source(
                config::Environment::with_prefix(prefix)
                    .prefix_separator("_")
                    .separator("__"),
            );
        }

        let config: Config = builder
            .build()
            .map_err(load_err)?
            .try_deserialize()
            .map_err(load_err)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.global.n_retries == 0 {
            return Err(ConfigError::invalid("global.n_retries", "must be at least 1"));
        }
        let g = &self.global;
        for (key, period) in [
            ("global.status_recheck_period", g.status_recheck_period),
            ("global.external_wan_recheck_period", g.external_wan_recheck_period),
            ("global.outage_recheck_period", g.outage_recheck_period),
            ("global.recovery_delay", g.recovery_delay),
        ] {
            if period > MAX_PERIOD {
                return Err(ConfigError::invalid(key, "must be at most 366 days"));
            }
        }
        for (key, device) in [("router", &self.router), ("modem", &self.modem)] {
            let Some(device) = device else { continue };
            if device.status_page.is_empty() {
                return Err(ConfigError::invalid(
                    format!("{key}.status_page"),
                    "must not be empty",
                ));
            }
            if device.retries == Some(0) {
                return Err(ConfigError::invalid(
                    format!("{key}.retries"),
                    "must be at least 1",
                ));
            }
        }
        if let Some(ext) = &self.external_wan_ip {
            if ext.url.is_empty() {
                return Err(ConfigError::invalid("external_wan_ip.url", "must not be empty"));
            }
        }
        Ok(())
    }
}

/// A configuration source the service loop can poll for changes
pub trait ConfigSource: Send {
    /// Returns the new configuration when the source changed since the last call
    fn reload_if_changed(&mut self) -> Result<Option<Config>, ConfigError>;
}

/// Watches a config file by modification time
pub struct FileConfigSource {
    path: PathBuf,
    modified: Option<SystemTime>,
    env_prefix: Option<&'static str>,
}

impl FileConfigSource {
    /// Load the file for the first time and start watching it
    pub fn open(path: &Path) -> Result<(Self, Config), ConfigError> {
        Self::open_with_env(path, Some(ENV_PREFIX))
    }

    fn open_with_env(
        path: &Path,
        env_prefix: Option<&'static str>,
    ) -> Result<(Self, Config), ConfigError> {
        let modified = modified_time(path);
        let config = Config::load_with_env(path, env_prefix)?;
        let source = Self {
            path: path.to_path_buf(),
            modified,
            env_prefix,
        };
        Ok((source, config))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileConfigSource {
    fn reload_if_changed(&mut self) -> Result<Option<Config>, ConfigError> {
        let modified = modified_time(&self.path);
        if modified == self.modified {
            return Ok(None);
        }
        // Remember the new stamp even if loading fails, so a broken edit is
        // reported once rather than every pass.
        self.modified = modified;
        Config::load_with_env(&self.path, self.env_prefix).map(Some)
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

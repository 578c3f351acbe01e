use crate::fuzzer::DEFAULT_CHUNK_SIZE;
use crate::openflow::OfVersion;
use crate::rules::DEFAULT_RULES_FILE;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Which side of the proxy has its traffic fuzzed. The other side is relayed as is.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FuzzDirection {
    #[default]
    SwitchToController,
    ControllerToSwitch,
    Both,
}

impl FuzzDirection {
    pub fn fuzzes_switch_side(self) -> bool {
        matches!(self, FuzzDirection::SwitchToController | FuzzDirection::Both)
    }

    pub fn fuzzes_controller_side(self) -> bool {
        matches!(self, FuzzDirection::ControllerToSwitch | FuzzDirection::Both)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ProxySettings {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_controller_addr")]
    pub controller_addr: String,
    #[serde(default)]
    pub fuzz_direction: FuzzDirection,
    #[serde(default = "default_exit_timeout_ms")]
    pub exit_timeout_ms: u64,
}

pub fn default_listen_addr() -> String {
    "0.0.0.0:6653".to_string()
}

pub fn default_controller_addr() -> String {
    "127.0.0.1:6633".to_string()
}

fn default_exit_timeout_ms() -> u64 {
    500
}

impl ProxySettings {
    pub fn exit_timeout(&self) -> Duration {
        Duration::from_millis(self.exit_timeout_ms)
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            controller_addr: default_controller_addr(),
            fuzz_direction: FuzzDirection::default(),
            exit_timeout_ms: default_exit_timeout_ms(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    #[serde(default = "default_rules_path")]
    pub rules_path: PathBuf,
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_auto_filter")]
    pub auto_filter: bool,
}

pub fn default_rules_path() -> PathBuf {
    PathBuf::from(DEFAULT_RULES_FILE)
}

pub fn default_report_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_auto_filter() -> bool {
    true
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            rules_path: default_rules_path(),
            report_dir: default_report_dir(),
            chunk_size: default_chunk_size(),
            seed: None,
            auto_filter: default_auto_filter(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FlowFuzzConfig {
    #[serde(default = "default_openflow_version")]
    pub openflow_version: OfVersion,
    #[serde(default)]
    pub proxy: ProxySettings,
    #[serde(default)]
    pub fuzzer: FuzzerSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

fn default_openflow_version() -> OfVersion {
    OfVersion::V1_3
}

impl FlowFuzzConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: FlowFuzzConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }
}

impl Default for FlowFuzzConfig {
    fn default() -> Self {
        Self {
            openflow_version: default_openflow_version(),
            proxy: ProxySettings::default(),
            fuzzer: FuzzerSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

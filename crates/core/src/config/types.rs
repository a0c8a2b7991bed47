use serde::{Deserialize, Serialize};

use crate::chunked::ChunkingConfig;
use crate::process::ProcessConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub process: ProcessConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// How results are reported
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    /// Print Prometheus metrics to stderr when a run ends
    #[serde(default)]
    pub print_metrics: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.process.workers >= 1);
        assert_eq!(config.chunking.window_ms, 1000);
        assert_eq!(config.output.format, OutputFormat::Text);
        assert!(!config.output.print_metrics);
    }

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
[process]
workers = 3
input_capacity = 10
output_capacity = 20
name = "digest"

[chunking]
window_ms = 250

[output]
format = "json"
print_metrics = true
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.process.workers, 3);
        assert_eq!(config.process.input_capacity, 10);
        assert_eq!(config.process.output_capacity, 20);
        assert_eq!(config.process.name, "digest");
        assert_eq!(config.chunking.window_ms, 250);
        assert_eq!(config.output.format, OutputFormat::Json);
        assert!(config.output.print_metrics);
    }

    #[test]
    fn test_unknown_output_format_fails() {
        let result: Result<Config, _> = toml::from_str("[output]\nformat = \"xml\"");
        assert!(result.is_err());
    }
}

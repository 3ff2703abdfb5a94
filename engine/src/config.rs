//! Facilities for reading runtime configuration values
//!
//! Follows the same `figment` (toml file + prefixed env overrides) pattern
//! used by the other backends in this family.
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use tracing::error;

/// How aggressively the source normalizer should comment out dead assignments
/// (spec §4.A step 4)
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Maps onto the `tracing` level that should be enabled as the default filter
    pub fn as_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warning => tracing::Level::WARN,
            // `tracing` has no "critical" level of its own; ERROR is the closest match.
            LogLevel::Error | LogLevel::Critical => tracing::Level::ERROR,
        }
    }
}

/// Resolves the Open Question in spec §9 about which position the
/// doc-variable/property pairing heuristic should favor. Both are exposed as
/// configuration rather than one being silently chosen.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocPropertyPairing {
    /// Treat the string immediately following a name as its value (default;
    /// preserves the behavior of the tool this design is based on).
    #[default]
    OneAhead,
    /// Treat the string two positions ahead as the value.
    TwoAhead,
}

/// Engine-wide configuration, as enumerated in the design's configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Enable useless-assignment/dim stripping (spec §4.A step 4)
    #[serde(default)]
    pub strip_useless: bool,
    /// Explicit emulation entry points; `None` falls back to the `Auto*` /
    /// `*_Open` / `*_Change` / `*_Activate` name-matching heuristic
    #[serde(default)]
    pub entry_points: Option<Vec<String>>,
    /// Use a worker pool to parse multiple streams concurrently
    #[serde(default = "default_true")]
    pub parallel_parse: bool,
    /// Call-stack depth bound (spec §3 invariant iii)
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: u32,
    /// Per-loop iteration cap (spec §4.E)
    #[serde(default = "default_loop_limit")]
    pub loop_iteration_limit: u32,
    /// Packrat memo table capacity, per parser instance
    #[serde(default = "default_packrat_cache_size")]
    pub packrat_cache_size: usize,
    /// Logging verbosity
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
    /// Root directory for the `<basename>_artifacts/` output tree
    #[serde(default = "default_artifacts_path")]
    pub artifacts_path: String,
    /// Maximum size, in bytes, of a single artifact file
    #[serde(default = "default_artifact_size_limit")]
    pub artifact_size_limit: u64,
    /// Which doc-var/property pairing heuristic to apply
    #[serde(default)]
    pub doc_property_pairing: DocPropertyPairing,
}

fn default_true() -> bool {
    true
}
fn default_recursion_limit() -> u32 {
    13_000
}
fn default_loop_limit() -> u32 {
    5_000
}
fn default_packrat_cache_size() -> usize {
    10_000_000
}
fn default_log_level() -> LogLevel {
    LogLevel::Info
}
fn default_artifacts_path() -> String {
    "./artifacts".to_string()
}
fn default_artifact_size_limit() -> u64 {
    64 * 1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Config {
            strip_useless: false,
            entry_points: None,
            parallel_parse: default_true(),
            recursion_limit: default_recursion_limit(),
            loop_iteration_limit: default_loop_limit(),
            packrat_cache_size: default_packrat_cache_size(),
            log_level: default_log_level(),
            artifacts_path: default_artifacts_path(),
            artifact_size_limit: default_artifact_size_limit(),
            doc_property_pairing: DocPropertyPairing::default(),
        }
    }
}

impl Config {
    /// Loads the configuration from a `toml` file, falling back to defaults,
    /// with `ENGINE__`-prefixed environment variables taking precedence
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config: Self = Figment::new()
            .merge(Toml::file("engine.toml"))
            .merge(Env::prefixed("ENGINE__").split("__"))
            .extract()
            .map_err(|err| {
                error!("Failed to validate configuration: {}", err);
                err
            })?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Config::default();
        assert_eq!(c.recursion_limit, 13_000);
        assert_eq!(c.loop_iteration_limit, 5_000);
        assert_eq!(c.doc_property_pairing, DocPropertyPairing::OneAhead);
    }
}

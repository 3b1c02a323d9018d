//! Configuration structures for the PLC simulator.
//!
//! Supports TOML deserialization with sensible defaults, mirroring the
//! JSON configuration document of the original `plcsimulator` project
//! key-for-key (`memory_manager`, `io_manager`, `fieldbus_manager`,
//! `listener`).

use serde::{Deserialize, Serialize};

/// Top-level simulator configuration, loaded from a single TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Logging setup; opaque to the core subsystems.
    pub logging: LoggingConfig,
    /// Memory image sizing.
    pub memory_manager: MemoryManagerConfig,
    /// Signal simulation producers.
    pub io_manager: IoManagerConfig,
    /// Modbus fieldbus modules, one per listening port.
    pub fieldbus_manager: FieldbusManagerConfig,
    /// TCP listener bind parameters.
    pub listener: ListenerConfig,
}

impl SimulatorConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

/// Logging setup. The core subsystems only consult `level`; everything
/// else is forwarded to `tracing-subscriber` verbatim by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// `memory_manager` configuration block.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MemoryManagerConfig {
    /// Slot counts for each of the four memory sections.
    pub memspace: MemspaceSizeConfig,
}

/// Slot counts used to size the memory image at construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MemspaceSizeConfig {
    /// Number of addressable bits in the `bits` section.
    pub blen: usize,
    /// Number of 16-bit words in the `words16` section.
    pub w16len: usize,
    /// Number of 32-bit words in the `words32` section.
    pub w32len: usize,
    /// Number of 64-bit words in the `words64` section.
    pub w64len: usize,
}

/// `io_manager` configuration block: the list of signal simulation producers.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IoManagerConfig {
    /// Producer definitions.
    pub simulations: Vec<SimulationConfig>,
}

/// A reference to a window of a memory section, used both as a producer's
/// write target and (for `copy`/`transform`) its read source.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MemspaceRef {
    /// Target section name (`bits`, `words16`, `words32`, `words64`).
    pub section: String,
    /// Starting address within the section.
    pub addr: usize,
    /// Word count, for word sections.
    pub nwords: Option<usize>,
    /// Bit count, for the `bits` section.
    pub nbits: Option<usize>,
}

impl MemspaceRef {
    /// Number of elements (words or bits) this reference spans.
    #[must_use]
    pub fn nrefs(&self) -> usize {
        self.nwords.or(self.nbits).unwrap_or(1)
    }
}

/// One producer definition: where it writes, what function family it runs,
/// and (for `copy`/`transform`) what it reads from.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SimulationConfig {
    /// Simulation ID. Synthesized from `memspace`/`function` if absent.
    pub id: Option<String>,
    /// The window this producer writes into on every tick.
    pub memspace: MemspaceRef,
    /// The signal family and its parameters.
    pub function: FunctionConfig,
    /// Source window for `copy`/`transform` producers.
    pub source: Option<SourceConfig>,
    /// Inter-tick delay in seconds. No sleep if absent.
    pub pause: Option<f64>,
}

/// Source reference for `copy`/`transform` producers.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SourceConfig {
    /// The window this producer reads from.
    pub memspace: MemspaceRef,
}

/// Signal family selector and its parameters.
///
/// All parameters are optional so a single flat struct can represent every
/// family; each family only consults the fields relevant to it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FunctionConfig {
    /// Family name: `counter`, `binary`, `static`, `sin`/`sine`/`cos`/`cosine`/
    /// `sawtooth`/`square`, `randrange`, `lognormal`, `uniform`, `copy`, `transform`.
    #[serde(rename = "type")]
    pub kind: String,
    /// `counter`/`randrange` range parameters: `[]`, `[stop]`, or `[start, stop]`.
    pub range: Option<Vec<i64>>,
    /// `static` constant value.
    pub value: Option<i64>,
    /// Seed for the per-producer RNG, for random families.
    pub seed: Option<u64>,
    /// `lognormal` mean (default 0).
    pub mu: Option<f64>,
    /// `lognormal` standard deviation (default 1).
    pub sigma: Option<f64>,
    /// `uniform` lower bound (default 0).
    pub a: Option<f64>,
    /// `uniform` upper bound (default 1).
    pub b: Option<f64>,
    /// `transform` rule list, evaluated in order; first match wins.
    pub rules: Option<Vec<TransformRule>>,
}

/// A single `transform` rule: `in -> out`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformRule {
    /// Matches either a scalar state value or an inclusive `[lo, hi]` range.
    #[serde(rename = "in")]
    pub input: InputMatch,
    /// Output value. `None` means passthrough (emit the matched state).
    pub out: Option<i64>,
}

/// The `in` side of a transform rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputMatch {
    /// Matches a single state value.
    Scalar(i64),
    /// Matches an inclusive `[lo, hi]` range.
    Range(Vec<i64>),
}

impl InputMatch {
    /// Whether `state` satisfies this match.
    #[must_use]
    pub fn matches(&self, state: i64) -> bool {
        match self {
            InputMatch::Scalar(v) => *v == state,
            InputMatch::Range(bounds) => {
                bounds.len() == 2 && bounds[0] <= state && state <= bounds[1]
            }
        }
    }
}

/// `fieldbus_manager` configuration block: one entry per listening port.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FieldbusManagerConfig {
    /// Module definitions.
    pub modules: Vec<ModuleConfig>,
}

/// One fieldbus module: a protocol identifier bound to a TCP port.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ModuleConfig {
    /// Module ID, used in logging.
    pub id: String,
    /// Dotted module path, carried for fidelity with the original
    /// configuration shape. Resolved through a compile-time registry
    /// rather than a dynamic import -- see `plc-fieldbus::registry`.
    pub module: Option<String>,
    /// Class name within `module`, same caveat as above.
    pub class: Option<String>,
    /// TCP port this module listens on.
    pub port: u16,
    /// Module-specific configuration.
    pub conf: ModuleInnerConfig,
}

/// Per-module configuration understood by the Modbus engine.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ModuleInnerConfig {
    /// If true, the connection closes after a single serviced request.
    pub one_shot: bool,
}

/// `listener` configuration block: TCP bind parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Host/address to bind.
    pub host: String,
    /// Default port, when a module does not specify its own.
    pub port: u16,
    /// Accept queue backlog.
    pub backlog: u32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5555,
            backlog: 10,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SimulatorConfig::default();
        assert_eq!(config.listener.host, "localhost");
        assert_eq!(config.listener.port, 5555);
        assert_eq!(config.listener.backlog, 10);
        assert!(config.io_manager.simulations.is_empty());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
            [memory_manager.memspace]
            w16len = 16

            [[fieldbus_manager.modules]]
            id = "modbus0"
            port = 5555
            conf = { one_shot = false }
        "#;

        let config = SimulatorConfig::from_toml(toml).unwrap();
        assert_eq!(config.memory_manager.memspace.w16len, 16);
        assert_eq!(config.fieldbus_manager.modules.len(), 1);
        assert_eq!(config.fieldbus_manager.modules[0].port, 5555);
    }

    #[test]
    fn test_parse_simulation_counter() {
        let toml = r#"
            [[io_manager.simulations]]
            pause = 0.01

            [io_manager.simulations.memspace]
            section = "words16"
            addr = 0
            nwords = 1

            [io_manager.simulations.function]
            type = "counter"
            range = [0, 4, 1]
        "#;

        let config = SimulatorConfig::from_toml(toml).unwrap();
        let sim = &config.io_manager.simulations[0];
        assert_eq!(sim.function.kind, "counter");
        assert_eq!(sim.function.range, Some(vec![0, 4, 1]));
        assert_eq!(sim.memspace.section, "words16");
    }

    #[test]
    fn test_transform_rule_matching() {
        let scalar = InputMatch::Scalar(5);
        assert!(scalar.matches(5));
        assert!(!scalar.matches(6));

        let range = InputMatch::Range(vec![1, 10]);
        assert!(range.matches(1));
        assert!(range.matches(10));
        assert!(!range.matches(11));
    }

    #[test]
    fn test_roundtrip_toml() {
        let config = SimulatorConfig::default();
        let toml = config.to_toml().unwrap();
        let parsed = SimulatorConfig::from_toml(&toml).unwrap();
        assert_eq!(config.listener.port, parsed.listener.port);
    }
}

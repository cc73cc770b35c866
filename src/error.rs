//! Error types for sepconv operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for sepconv operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced at configuration or host-tooling time.
///
/// Nothing in here is raised by a unit while it is ticking: arithmetic overflow saturates,
/// out-of-range channel indices are clamped and a starved stream times out.
#[derive(Debug, Error)]
pub enum Error {
  /// Unit geometry or parameters rejected before the first tick
  #[error("invalid configuration: {reason}")]
  Config {
    /// What was wrong with it
    reason: String,
  },

  /// Weight store cannot satisfy the configured unit
  #[error("weight store holds {available} coefficients, {unit} needs {required}")]
  Weights {
    /// Unit that asked
    unit: &'static str,
    /// Coefficients needed
    required: usize,
    /// Coefficients present
    available: usize,
  },

  /// Sample stream length does not match the configured geometry
  #[error("input stream holds {actual} samples, expected {expected}")]
  InputLength {
    /// Samples expected
    expected: usize,
    /// Samples supplied
    actual: usize,
  },

  /// Malformed `.mem` file
  #[error("{path}:{line}: {reason}")]
  MemFile {
    /// File being parsed
    path: PathBuf,
    /// 1-based line number
    line: usize,
    /// Parse failure
    reason: String,
  },

  /// Underlying I/O error
  #[error("I/O error: {source}")]
  Io {
    #[from]
    source: std::io::Error,
  },

  /// Config file did not parse
  #[error("failed to parse TOML config: {source}")]
  Toml {
    #[from]
    source: toml::de::Error,
  },

  /// Message payload or trace encoding failed
  #[error("JSON encoding error: {source}")]
  Json {
    #[from]
    source: serde_json::Error,
  },

  /// Discrete-event simulator reported an error
  #[error("simulation error: {0}")]
  Simulation(String),

  /// Tick budget ran out before the chain produced every expected output
  #[error("stalled after {ticks} ticks with {produced}/{expected} outputs")]
  Stalled {
    /// Ticks simulated
    ticks: u64,
    /// Outputs collected
    produced: usize,
    /// Outputs expected
    expected: usize,
  },
}

impl Error {
  pub fn config(reason: impl Into<String>) -> Self {
    Self::Config { reason: reason.into() }
  }
}

impl From<sim::utils::errors::SimulationError> for Error {
  fn from(err: sim::utils::errors::SimulationError) -> Self {
    Self::Simulation(format!("{:?}", err))
  }
}

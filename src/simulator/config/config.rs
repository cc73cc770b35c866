use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::arch::depthwise::DepthwiseConfig;
use crate::arch::top::Network;
use crate::error::{Error, Result};
use crate::simulator::data::MemFormat;
use crate::simulator::sim::mode::{SimConfig, StepMode};

const DEFAULT_CONFIG: &str = include_str!("default.toml");

/// Block geometry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NetworkSection {
  pub in_width: usize,
  pub in_height: usize,
  pub channels: usize,
  pub stride: usize,
  pub padding: usize,
  pub out_channels: usize,
  pub parallelism: usize,
  #[serde(default)]
  pub idle_timeout: u32,
}

/// Memory images fed to the chain
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DataSection {
  #[serde(default)]
  pub format: MemFormat,
  pub input: String,
  pub depthwise_weights: String,
  pub pointwise_weights: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SimulationSection {
  #[serde(default)]
  pub quiet: bool,
  #[serde(default)]
  pub step_mode: bool,
  #[serde(default)]
  pub trace_file: String,
  pub max_ticks: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AppConfig {
  pub network: NetworkSection,
  pub data: DataSection,
  pub simulation: SimulationSection,
}

impl AppConfig {
  pub fn network(&self) -> Result<Network> {
    let n = &self.network;
    let depthwise = DepthwiseConfig::new(n.in_width, n.in_height, n.channels, n.stride, n.padding)?;
    let idle_timeout = if n.idle_timeout == 0 { None } else { Some(n.idle_timeout) };
    Network::new(depthwise, n.out_channels, n.parallelism, idle_timeout)
  }

  pub fn sim_config(&self) -> SimConfig {
    SimConfig {
      quiet: self.simulation.quiet,
      step_mode: if self.simulation.step_mode {
        StepMode::Step
      } else {
        StepMode::Continuous
      },
      trace_file: if self.simulation.trace_file.is_empty() {
        None
      } else {
        Some(self.simulation.trace_file.clone())
      },
      max_ticks: self.simulation.max_ticks,
    }
  }
}

/// Flags from the command line that take precedence over any file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
  pub quiet: bool,
  pub step: bool,
  pub trace_file: Option<String>,
  pub max_ticks: Option<u64>,
}

fn parse_table(content: &str) -> Result<toml::Table> {
  Ok(toml::from_str::<toml::Table>(content)?)
}

/// Built-in defaults
pub fn load_default_config() -> Result<AppConfig> {
  Ok(toml::Value::Table(parse_table(DEFAULT_CONFIG)?).try_into()?)
}

/// Read a user config file. Keys it leaves out are not filled in here, see `merge_tables`.
pub fn load_config_file(path: &Path) -> Result<toml::Table> {
  let content = fs::read_to_string(path)
    .map_err(|e| Error::config(format!("cannot read config file {}: {}", path.display(), e)))?;
  parse_table(&content)
}

/// Overlay `overlay` onto `base`, recursing into sub-tables; the later value wins.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
  for (key, value) in overlay {
    if let toml::Value::Table(over_sub) = value {
      if let Some(toml::Value::Table(base_sub)) = base.get_mut(&key) {
        merge_tables(base_sub, over_sub);
        continue;
      }
      base.insert(key, toml::Value::Table(over_sub));
    } else {
      base.insert(key, value);
    }
  }
}

pub fn apply_cli_overrides(config: &mut AppConfig, cli: &CliOverrides) {
  if cli.quiet {
    config.simulation.quiet = true;
  }
  if cli.step {
    config.simulation.step_mode = true;
  }
  if let Some(file) = &cli.trace_file {
    config.simulation.trace_file = file.clone();
  }
  if let Some(ticks) = cli.max_ticks {
    config.simulation.max_ticks = ticks;
  }
}

fn resolve_single_path(path_str: &str, base_dir: &Path) -> String {
  if path_str.is_empty() {
    return path_str.to_string();
  }
  let path = Path::new(path_str);
  if path.is_absolute() {
    return path_str.to_string();
  }
  base_dir.join(path).to_string_lossy().to_string()
}

/// Make data and trace paths absolute against `base_dir`.
pub fn resolve_paths(config: &mut AppConfig, base_dir: &Path) {
  config.data.input = resolve_single_path(&config.data.input, base_dir);
  config.data.depthwise_weights = resolve_single_path(&config.data.depthwise_weights, base_dir);
  config.data.pointwise_weights = resolve_single_path(&config.data.pointwise_weights, base_dir);
  config.simulation.trace_file = resolve_single_path(&config.simulation.trace_file, base_dir);
}

pub fn validate_config(config: &AppConfig) -> Result<()> {
  config.network()?;

  for (name, path) in [
    ("input", &config.data.input),
    ("depthwise_weights", &config.data.depthwise_weights),
    ("pointwise_weights", &config.data.pointwise_weights),
  ] {
    if path.trim().is_empty() {
      return Err(Error::config(format!("data.{} cannot be empty", name)));
    }
  }

  if config.simulation.max_ticks == 0 {
    return Err(Error::config("simulation.max_ticks must be greater than 0"));
  }
  Ok(())
}

/// Defaults, then the optional config file, then CLI flags; paths resolved, result validated.
///
/// Relative paths in a config file are taken relative to that file; without a file they are
/// taken relative to `work_dir`.
pub fn load_and_merge_configs(custom_config_path: Option<&Path>, work_dir: &Path, cli: &CliOverrides) -> Result<AppConfig> {
  let mut table = parse_table(DEFAULT_CONFIG)?;
  let mut base_dir: PathBuf = work_dir.to_path_buf();

  if let Some(custom_path) = custom_config_path {
    let custom_path = if custom_path.is_absolute() {
      custom_path.to_path_buf()
    } else {
      work_dir.join(custom_path)
    };
    merge_tables(&mut table, load_config_file(&custom_path)?);
    if let Some(parent) = custom_path.parent() {
      base_dir = parent.to_path_buf();
    }
  }

  let mut config: AppConfig = toml::Value::Table(table).try_into()?;
  apply_cli_overrides(&mut config, cli);
  resolve_paths(&mut config, &base_dir);
  validate_config(&config)?;
  Ok(config)
}

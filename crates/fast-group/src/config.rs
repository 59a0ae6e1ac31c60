use crate::job::JobSpec;
use crate::{GroupError, Result};
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How the coordinator learns that jobs started and finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
  /// One monitor task per job, events consumed from a queue.
  #[default]
  Queue,
  /// One task per job sharing the locked group, awaited by a supervisor.
  Tasks,
  /// A single loop checking every job on a fixed interval.
  Poll,
}

impl fmt::Display for Backend {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Backend::Queue => write!(f, "queue"),
      Backend::Tasks => write!(f, "tasks"),
      Backend::Poll => write!(f, "poll"),
    }
  }
}

impl FromStr for Backend {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "queue" => Ok(Backend::Queue),
      "tasks" => Ok(Backend::Tasks),
      "poll" => Ok(Backend::Poll),
      other => Err(format!(
        "unknown backend '{}', expected queue, tasks or poll",
        other
      )),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorSettings {
  pub backend: Backend,
  pub capture_output: bool,
  /// Only used by [`Backend::Poll`].
  pub poll_interval: Duration,
  pub kill_signal: Signal,
}

impl Default for ExecutorSettings {
  fn default() -> Self {
    Self {
      backend: Backend::default(),
      capture_output: true,
      poll_interval: DEFAULT_POLL_INTERVAL,
      kill_signal: Signal::SIGTERM,
    }
  }
}

#[derive(Debug, Clone)]
pub enum ConfigSource {
  TomlFile(PathBuf),
  JsonFile(PathBuf),
}

impl ConfigSource {
  pub fn from_path(path: PathBuf) -> Self {
    match path.extension().and_then(|ext| ext.to_str()) {
      Some("json") => ConfigSource::JsonFile(path),
      _ => ConfigSource::TomlFile(path),
    }
  }

  pub fn path(&self) -> &Path {
    match self {
      ConfigSource::TomlFile(path) | ConfigSource::JsonFile(path) => path,
    }
  }
}

// Порядок проверки файлов
const FILE_CANDIDATES: [(&str, fn(PathBuf) -> ConfigSource); 4] = [
  (".fast-group.toml", ConfigSource::TomlFile),
  ("fast-group.toml", ConfigSource::TomlFile),
  (".fast-group.json", ConfigSource::JsonFile),
  ("fast-group.json", ConfigSource::JsonFile),
];

#[derive(Debug, Default, Deserialize)]
pub struct Config {
  // "queue" (по умолчанию), "tasks" или "poll"
  #[serde(default)]
  backend: Option<Backend>,

  #[serde(default)]
  capture_output: Option<bool>,

  // Интервал опроса, например "100ms"
  #[serde(default)]
  poll_interval: Option<String>,

  // Сигнал для остановки, например "SIGTERM"
  #[serde(default)]
  kill_signal: Option<String>,

  #[serde(default)]
  pub jobs: Vec<JobSpec>,

  #[serde(skip)]
  path: PathBuf,
}

impl Config {
  pub fn settings(&self) -> Result<ExecutorSettings> {
    let defaults = ExecutorSettings::default();

    let poll_interval = match &self.poll_interval {
      Some(value) => parse_interval(value)?,
      None => defaults.poll_interval,
    };

    let kill_signal = match &self.kill_signal {
      Some(value) => parse_signal(value).map_err(|details| GroupError::ConfigInvalid {
        path: self.path.clone(),
        details,
      })?,
      None => defaults.kill_signal,
    };

    Ok(ExecutorSettings {
      backend: self.backend.unwrap_or(defaults.backend),
      capture_output: self.capture_output.unwrap_or(defaults.capture_output),
      poll_interval,
      kill_signal,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn find_file() -> Result<ConfigSource> {
    Self::find_file_in(&std::env::current_dir()?)
  }

  pub fn find_file_in(dir: &Path) -> Result<ConfigSource> {
    let mut checked_paths = Vec::new();

    for (filename, source_fn) in FILE_CANDIDATES {
      let path = dir.join(filename);

      checked_paths.push(path.clone());

      if path.exists() {
        return Ok(source_fn(path));
      }
    }

    Err(GroupError::ConfigNotFound { checked_paths })
  }

  /// Load the first config file found in the working directory.
  pub fn load() -> Result<Config> {
    Self::load_source(Self::find_file()?)
  }

  pub fn load_from(path: &Path) -> Result<Config> {
    Self::load_source(ConfigSource::from_path(path.to_path_buf()))
  }

  pub fn load_source(source: ConfigSource) -> Result<Config> {
    let path = source.path().to_path_buf();
    let content = fs::read_to_string(&path).map_err(|e| GroupError::ConfigInvalid {
      path: path.clone(),
      details: format!("Failed to read config file: {}", e),
    })?;

    let mut config: Config = match source {
      ConfigSource::TomlFile(_) => toml::from_str(&content).map_err(|e| GroupError::ConfigInvalid {
        path: path.clone(),
        details: format!("Invalid TOML: {}", e),
      })?,
      ConfigSource::JsonFile(_) => {
        serde_json::from_str(&content).map_err(|e| GroupError::ConfigInvalid {
          path: path.clone(),
          details: format!("Invalid JSON: {}", e),
        })?
      }
    };
    config.path = path;

    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    let invalid = |details: String| GroupError::ConfigInvalid {
      path: self.path.clone(),
      details,
    };

    if self.jobs.is_empty() {
      return Err(invalid("No jobs configured".to_string()));
    }

    if let Some(index) = self.jobs.iter().position(|job| job.command.is_empty()) {
      return Err(invalid(format!("Job {} has an empty command", index)));
    }

    self.settings().map(|_| ())
  }
}

/// Parse a human readable interval such as `"100ms"` or `"2s"`.
pub fn parse_interval(value: &str) -> Result<Duration> {
  let interval = parse_duration::parse(value).map_err(|e| GroupError::InvalidDuration {
    value: value.to_string(),
    reason: e.to_string(),
  })?;

  if interval.is_zero() {
    return Err(GroupError::InvalidDuration {
      value: value.to_string(),
      reason: "interval must be greater than zero".to_string(),
    });
  }

  Ok(interval)
}

/// Accepts `SIGTERM`, `TERM` and `term` alike.
pub fn parse_signal(value: &str) -> std::result::Result<Signal, String> {
  let upper = value.trim().to_ascii_uppercase();
  let name = if upper.starts_with("SIG") {
    upper
  } else {
    format!("SIG{}", upper)
  };

  Signal::from_str(&name).map_err(|_| format!("Unknown signal '{}'", value))
}

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Identity of a job inside one group, assigned in launch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct JobId(pub usize);

impl fmt::Display for JobId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// One external command: executable followed by its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct JobSpec {
  pub command: Vec<String>,
}

impl JobSpec {
  pub fn new<I, S>(command: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      command: command.into_iter().map(Into::into).collect(),
    }
  }

  /// Runs `script` through `sh -c`, extra `args` become `$0`, `$1`, ...
  pub fn shell(script: &str, args: &[&str]) -> Self {
    let mut command = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
    command.extend(args.iter().map(|a| a.to_string()));
    Self { command }
  }

  pub fn program(&self) -> Option<&str> {
    self.command.first().map(String::as_str)
  }

  pub fn args(&self) -> &[String] {
    self.command.get(1..).unwrap_or(&[])
  }

  pub fn display(&self) -> String {
    self.command.join(" ")
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "code", rename_all = "snake_case")]
pub enum JobStatus {
  Running,
  Exited(i32),
  Killed,
}

impl JobStatus {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, JobStatus::Running)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, JobStatus::Exited(0))
  }
}

impl fmt::Display for JobStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      JobStatus::Running => write!(f, "running"),
      JobStatus::Exited(code) => write!(f, "exited({})", code),
      JobStatus::Killed => write!(f, "killed"),
    }
  }
}

/// What a process handle reports once it has reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
  pub status: JobStatus,
  /// Raw exit code; death by signal `s` is reported as `-s`.
  pub code: i32,
  pub output: Option<Vec<u8>>,
}

impl ExitReport {
  /// Non-zero exit, including deaths by signal, drives the fail-fast rule.
  pub fn is_failure(&self) -> bool {
    self.code != 0
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
  pub id: JobId,
  pub pid: u32,
  pub command: Vec<String>,
  pub status: JobStatus,
  pub exit_code: i32,
  #[serde(serialize_with = "serialize_output")]
  pub output: Option<Vec<u8>>,
  pub duration_ms: u128,
}

impl JobOutcome {
  pub fn output_text(&self) -> Option<String> {
    self
      .output
      .as_deref()
      .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
  }
}

fn serialize_output<S: Serializer>(output: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
  match output {
    Some(bytes) => s.serialize_some(&String::from_utf8_lossy(bytes)),
    None => s.serialize_none(),
  }
}

/// Outcome of one `execute` call, one entry per job in launch order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionResult {
  pub outcomes: Vec<JobOutcome>,
  /// Whether the fail-fast rule fired during this execution.
  pub cancelled: bool,
}

impl ExecutionResult {
  pub fn success(&self) -> bool {
    self.outcomes.iter().all(|o| o.status.is_success())
  }

  pub fn failed(&self) -> impl Iterator<Item = &JobOutcome> {
    self
      .outcomes
      .iter()
      .filter(|o| matches!(o.status, JobStatus::Exited(code) if code != 0))
  }

  pub fn killed(&self) -> impl Iterator<Item = &JobOutcome> {
    self
      .outcomes
      .iter()
      .filter(|o| o.status == JobStatus::Killed)
  }

  pub fn outcome(&self, id: JobId) -> Option<&JobOutcome> {
    self.outcomes.iter().find(|o| o.id == id)
  }
}

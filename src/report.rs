use crossterm::style::{Color, Stylize};
use fast_group_core::{ExecutionResult, JobOutcome, JobStatus};

pub trait StatusDisplay {
  fn colored(&self) -> (&'static str, Color);
}

impl StatusDisplay for JobStatus {
  fn colored(&self) -> (&'static str, Color) {
    match self {
      JobStatus::Running => ("⟳", Color::Yellow),
      JobStatus::Exited(0) => ("✓", Color::Green),
      JobStatus::Exited(_) => ("✗", Color::Red),
      JobStatus::Killed => ("☠", Color::Magenta),
    }
  }
}

pub fn format_outcome(outcome: &JobOutcome) -> String {
  let (symbol, _) = outcome.status.colored();
  format!(
    "{} {} {}: {} - {}ms",
    symbol,
    outcome.id,
    outcome.command.join(" "),
    outcome.status,
    outcome.duration_ms
  )
}

pub fn print_outcome(outcome: &JobOutcome) {
  let (_, color) = outcome.status.colored();
  println!("{}", format_outcome(outcome).with(color));

  if let Some(text) = outcome.output_text() {
    if !text.is_empty() {
      print!("{}", text);
      if !text.ends_with('\n') {
        println!();
      }
    }
  }
}

pub fn format_summary(result: &ExecutionResult) -> String {
  format!(
    "{} job(s): {} succeeded, {} failed, {} killed",
    result.outcomes.len(),
    result
      .outcomes
      .iter()
      .filter(|o| o.status.is_success())
      .count(),
    result.failed().count(),
    result.killed().count()
  )
}

pub fn print_summary(result: &ExecutionResult) {
  let color = if result.success() {
    Color::Green
  } else {
    Color::Red
  };
  println!("{}", format_summary(result).with(color));
}

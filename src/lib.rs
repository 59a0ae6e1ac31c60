pub mod report;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use fast_group_core::{Backend, Config, Coordinator, ExecutorSettings, JobSpec};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "fast-group")]
#[command(about = "Run commands in parallel and stop all of them on the first failure")]
#[command(version)]
pub struct Cli {
  #[command(subcommand)]
  command: Option<Commands>,

  /// How jobs are watched: queue, tasks or poll
  #[arg(long, global = true)]
  backend: Option<Backend>,

  /// Let jobs write straight to the terminal instead of capturing output
  #[arg(long, global = true)]
  no_capture: bool,

  /// Print the execution result as JSON
  #[arg(long, global = true)]
  json: bool,

  /// Log level used when RUST_LOG is not set
  #[arg(long, global = true, default_value = "warn")]
  log_level: String,
}

#[derive(Debug, Clone, Subcommand)]
enum Commands {
  /// Run the jobs listed in a config file
  Run {
    /// Config file; defaults to .fast-group.toml, fast-group.toml, .fast-group.json, fast-group.json
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
  },
  /// Run the built-in good and bad demonstration groups
  Demo,
  /// Run ad-hoc jobs, one per --job, split on whitespace
  Exec {
    #[arg(long = "job", value_name = "COMMAND", required = true)]
    jobs: Vec<String>,
  },
}

impl Cli {
  fn settings(&self, base: ExecutorSettings) -> ExecutorSettings {
    ExecutorSettings {
      backend: self.backend.unwrap_or(base.backend),
      capture_output: base.capture_output && !self.no_capture,
      ..base
    }
  }
}

/// Run the CLI. `Ok(false)` means at least one job did not succeed.
pub async fn run(cli: Cli) -> Result<bool> {
  fast_group_core::init_tracing(&cli.log_level)?;

  let command = cli.command.clone().unwrap_or(Commands::Run { config: None });

  match command {
    Commands::Run { config } => {
      // Загрузка конфигурации
      let config = match config {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
      };
      let settings = cli.settings(config.settings()?);
      execute_group(settings, &config.jobs, cli.json)
        .await
        .with_context(|| format!("running jobs from {:?}", config.path()))
    }
    Commands::Demo => {
      let mut success = true;
      for (name, jobs) in demo_groups() {
        if !cli.json {
          println!("== {} ==", name);
        }
        success &= execute_group(cli.settings(ExecutorSettings::default()), &jobs, cli.json).await?;
      }
      Ok(success)
    }
    Commands::Exec { jobs } => {
      let jobs = parse_jobs(&jobs)?;
      execute_group(cli.settings(ExecutorSettings::default()), &jobs, cli.json).await
    }
  }
}

async fn execute_group(settings: ExecutorSettings, jobs: &[JobSpec], json: bool) -> Result<bool> {
  let mut coordinator = Coordinator::new(settings);
  if !json {
    coordinator = coordinator.on_finish(report::print_outcome);
  }

  let result = coordinator.execute(jobs).await?;

  if json {
    println!("{}", serde_json::to_string_pretty(&result)?);
  } else {
    report::print_summary(&result);
  }

  Ok(result.success())
}

fn parse_jobs(raw: &[String]) -> Result<Vec<JobSpec>> {
  raw
    .iter()
    .map(|job| {
      let spec = JobSpec::new(job.split_whitespace());
      if spec.command.is_empty() {
        bail!("empty --job value");
      }
      Ok(spec)
    })
    .collect()
}

/// Job `name` prints, sleeps `sleep` seconds, prints again and exits with `code`.
pub fn demo_job(name: &str, code: i32, sleep: u32) -> JobSpec {
  JobSpec::shell(
    "echo \"Job $0: sleeping $2s\"; sleep $2; echo \"Job $0: exiting with $1\"; exit $1",
    &[name, &code.to_string(), &sleep.to_string()],
  )
}

pub fn demo_groups() -> Vec<(&'static str, Vec<JobSpec>)> {
  vec![
    ("good case", vec![demo_job("1", 0, 5), demo_job("2", 0, 2)]),
    ("bad case", vec![demo_job("1", 1, 5), demo_job("2", 2, 2)]),
  ]
}

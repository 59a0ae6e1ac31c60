use clap::Parser;
use fast_group::{Cli, run};

#[tokio::main]
async fn main() {
  match run(Cli::parse()).await {
    Ok(true) => {}
    Ok(false) => std::process::exit(1),
    Err(e) => {
      eprintln!("Error: {:#}", e);
      std::process::exit(1);
    }
  }
}

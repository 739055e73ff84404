use anyhow::Result;
use clap::{Parser, Subcommand};

use isocenter_qa::serve::{self, AnalyzeArgs, ServeArgs};

#[derive(Parser, Debug)]
#[command(name = "isocenter-qa", about = "Winston-Lutz isocenter QA web server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the upload/analysis pages and JSON endpoints
    Serve(ServeArgs),
    /// Analyze one image directory and print the result JSON
    Analyze(AnalyzeArgs),
}

fn main() -> Result<()> {
    // A missing .env is fine; settings may come from the real environment.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    match cli.command {
        Command::Serve(args) => serve::run(args),
        Command::Analyze(args) => serve::run_analyze(args),
    }
}

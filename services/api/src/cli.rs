use crate::demo::{run_demo, run_sweep_command, DemoArgs, SweepArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use compliance_engine::error::AppError;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Compliance Deadline Engine",
    about = "Track filing deadlines for business entities and prioritize reminders",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Run a single notification sweep over an entity roster and print the report
    Sweep(SweepArgs),
    /// Walk an annual report through reminders, overdue escalation, and renewal
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// CSV roster of business entities to load at startup
    #[arg(long)]
    pub(crate) roster: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Sweep(args) => run_sweep_command(args),
        Command::Demo(args) => run_demo(args),
    }
}

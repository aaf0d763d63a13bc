//! rulepack - compose rule packs into target-native rule outputs.

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod build;
mod confirm;
mod deps;
mod doctor;
mod init;
mod output;
mod profile;

use output::Renderer;

#[derive(Parser)]
#[command(name = "rulepack")]
#[command(version)]
#[command(about = "Import rule packs and compile target-native rule outputs")]
#[command(
    long_about = "rulepack composes rule packs into target outputs. Use --json for machine-readable output."
)]
struct Cli {
    /// Emit JSON output
    #[arg(long, global = true)]
    json: bool,

    /// Disable color in human output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a starter rulepack.json
    Init(init::InitArgs),

    /// Manage dependency lifecycle
    Deps {
        #[command(subcommand)]
        command: deps::DepsCommand,
    },

    /// Compile resolved rule packs into target outputs
    Build(build::BuildArgs),

    /// Validate environment, config, lockfile, and profile store
    Doctor,

    /// Manage reusable globally saved profiles
    Profile {
        #[command(subcommand)]
        command: profile::ProfileCommand,
    },
}

impl Command {
    fn name(&self) -> String {
        match self {
            Self::Init(_) => "init".to_string(),
            Self::Deps { command } => command.name(),
            Self::Build(_) => "build".to_string(),
            Self::Doctor => "doctor".to_string(),
            Self::Profile { command } => command.name(),
        }
    }
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry().with(layer).with(filter).init();

    let cli = Cli::parse();
    let renderer = Renderer::new(cli.json, cli.no_color);
    let command_name = cli.command.name();
    if let Err(error) = run(cli.command, &renderer) {
        renderer.render_error(&command_name, &error);
        std::process::exit(1);
    }
}

fn run(command: Command, renderer: &Renderer) -> anyhow::Result<()> {
    let manifest_dir = std::env::current_dir().context("resolve working directory")?;
    match command {
        Command::Init(args) => init::run(&manifest_dir, renderer, args),
        Command::Deps { command } => deps::run(&manifest_dir, renderer, command),
        Command::Build(args) => build::run(&manifest_dir, renderer, args),
        Command::Doctor => doctor::run(&manifest_dir, renderer),
        Command::Profile { command } => profile::run(&manifest_dir, renderer, command),
    }
}

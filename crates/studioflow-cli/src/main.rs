use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "studioflow", version, about = "Studioflow CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Session timer control
    Session {
        #[command(subcommand)]
        action: commands::session::SessionAction,
    },
    /// Streak continuity and freezes
    Streak {
        #[command(subcommand)]
        action: commands::streak::StreakAction,
    },
    /// Profile settings and balances
    Profile {
        #[command(subcommand)]
        action: commands::profile::ProfileAction,
    },
    /// Unlocked trophies
    Trophies {
        #[command(subcommand)]
        action: commands::trophies::TrophyAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Print shell completions
    Completions {
        shell: Shell,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("STUDIOFLOW_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Session { action } => commands::session::run(action),
        Commands::Streak { action } => commands::streak::run(action),
        Commands::Profile { action } => commands::profile::run(action),
        Commands::Trophies { action } => commands::trophies::run(action),
        Commands::Config { action } => commands::config::run(action),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "studioflow", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

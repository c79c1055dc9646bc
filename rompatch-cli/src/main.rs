use clap::Parser;
use tracing::Level;

use rompatch_cli::{commands, Commands};

#[derive(Parser)]
#[command(
    name = "rom-patcher",
    about = "Apply and create IPS, UPS, and BPS ROM patches",
    version,
    long_about = "A command-line tool for patching retro console ROM images. \
                  Supports the IPS, UPS, and BPS patch formats, optional \
                  checksum validation, platform header handling, and \
                  post-patch checksum repair."
)]
struct Cli {
    /// Set the logging level
    #[arg(short, long, value_enum, default_value = "warn")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(Level::from(cli.log_level))
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Patch(args) => commands::patch::handle(args),
        Commands::Create(args) => commands::create::handle(args),
        Commands::Info(args) => commands::info::handle(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

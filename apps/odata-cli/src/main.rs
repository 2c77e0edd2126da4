use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod common;
mod decode_token;
mod parse_ref;
mod validate;

#[derive(Parser)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(name = "odata")]
struct Cli {
    /// Log output format; the level comes from `RUST_LOG` (default `info`).
    #[arg(long, value_enum, global = true, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    Validate(validate::ValidateArgs),
    ParseRef(parse_ref::ParseRefArgs),
    DecodeToken(decode_token::DecodeTokenArgs),
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    match cli.command {
        Commands::Validate(validate) => validate.run(),
        Commands::ParseRef(parse_ref) => parse_ref.run(),
        Commands::DecodeToken(decode_token) => decode_token.run(),
    }
}

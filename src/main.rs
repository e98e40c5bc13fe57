use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use invoice_feedback::clock::SystemClock;
use invoice_feedback::store::{InvoiceStore, PersistenceStore};
use invoice_feedback::text_source::PlainTextFile;
use invoice_feedback::{AppContext, Config};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "invoice-feedback")]
#[command(about = "Invoice field extraction with a correction feedback loop")]
#[command(version)]
struct Cli {
    /// Configuration file; defaults are used when it does not exist
    #[arg(
        long,
        global = true,
        env = "INVOICE_CONFIG",
        default_value = "config/invoice.toml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Extract, validate and store a document
    Extract {
        /// Plain-text invoice document
        file: PathBuf,
    },

    /// Record a correction for a stored extraction
    Correct {
        /// Id returned by `extract`
        id: String,
        /// Field being corrected
        field: String,
        /// Correct value
        value: String,
    },

    /// Retrain the correction model now
    Retrain,

    /// Show model and correction statistics
    Status,

    /// Dump every stored extraction and correction as JSON
    Export,
}

fn load_config(path: &Path) -> Result<Config, Box<dyn std::error::Error>> {
    if path.exists() {
        info!(path = %path.display(), "Loading configuration");
        Ok(Config::load(path)?)
    } else {
        info!(path = %path.display(), "No configuration file, using defaults");
        Ok(Config::default())
    }
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cfg = load_config(&cli.config)?;
    let store = InvoiceStore::new(&cfg.db_path)?;
    let text_source = Box::new(PlainTextFile::new(&cfg.supported_extensions));
    let ctx = AppContext::new(cfg, store, Box::new(SystemClock), text_source)?;

    match cli.command {
        Commands::Extract { file } => {
            let processed = ctx.process(&file)?;
            println!("{}", serde_json::to_string_pretty(&processed)?);
        }
        Commands::Correct { id, field, value } => {
            let receipt = ctx.record_correction(&id, &field, &value)?;
            println!("{}", serde_json::to_string_pretty(&receipt)?);
        }
        Commands::Retrain => {
            let outcome = ctx.retrain();
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.success {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Status => {
            println!("{}", ctx.training_status()?);
        }
        Commands::Export => {
            println!("{}", serde_json::to_string_pretty(&ctx.store().export()?)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use clap::error::ErrorKind;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from(["invoice-feedback", "correct", "abc", "date", "2024-01-15"])
            .unwrap();
        assert_eq!(
            cli.command,
            Commands::Correct {
                id: "abc".into(),
                field: "date".into(),
                value: "2024-01-15".into(),
            }
        );

        let cli = Cli::try_parse_from(["invoice-feedback", "--config", "x.toml", "status"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("x.toml"));
        assert_eq!(cli.command, Commands::Status);
    }

    #[test]
    fn test_flags_are_not_file_names() {
        let err = Cli::try_parse_from(["invoice-feedback", "extract", "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);

        let err = Cli::try_parse_from(["invoice-feedback", "extract", "--bogus"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);

        let err = Cli::try_parse_from(["invoice-feedback", "correct", "abc"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }
}

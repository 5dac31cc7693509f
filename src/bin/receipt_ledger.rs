use clap::{Parser, Subcommand};
use receipt_ledger::config::DEFAULT_CONFIG_PATH;
use receipt_ledger::{
    aggregate_targets, clean_workspaces, parser_for, Config, Diagnostic, DiagnosticSink,
    Diagnostics, Issue, MailFile, ReceiptCollection, Vendor,
};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "receipt-ledger",
    version,
    about = "Turns retailer order-confirmation mails into ledger receipts"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan each target's mail directory and write its markdown and GnuCash CSV.
    Aggregate {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Only process this target.
        #[arg(long)]
        target: Option<String>,

        /// Fail when any error-level diagnostic was reported.
        #[arg(long)]
        strict: bool,
    },

    /// Parse mail files and print the receipts as JSON.
    Inspect {
        /// amazon, bookwalker, melonbooks or yodobashi.
        #[arg(long)]
        vendor: String,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Remove every target workspace.
    Clean {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

fn aggregate(config: PathBuf, target: Option<String>, strict: bool) -> receipt_ledger::Result<bool> {
    let config = Config::from_path(&config)?;
    let mut sink = Diagnostics::new();
    aggregate_targets(&config, target.as_deref(), &mut sink)?;
    let errors = sink.error_count();
    if errors > 0 {
        info!(errors, warnings = sink.len() - errors, "finished with diagnostics");
    }
    Ok(!(strict && errors > 0))
}

fn inspect(vendor: &str, files: Vec<PathBuf>) -> receipt_ledger::Result<bool> {
    let vendor = vendor.parse::<Vendor>()?;
    let parser = parser_for(vendor);
    let mut sink = Diagnostics::new();
    let mut mails = Vec::new();
    for path in files {
        let origin = path.display().to_string();
        match MailFile::read_file(&path) {
            Ok(mail) => mails.push((origin, mail)),
            Err(err) => sink.report(Diagnostic {
                origin,
                issue: Issue::UnreadableMail {
                    error: err.to_string(),
                },
            }),
        }
    }
    let collection = ReceiptCollection::scan(parser.as_ref(), mails, &mut sink);
    let out = json!({
        "vendor": vendor,
        "summary": collection.summary(),
        "receipts": collection.iter().collect::<Vec<_>>(),
        "diagnostics": sink.iter().collect::<Vec<_>>(),
    });
    match serde_json::to_string_pretty(&out) {
        Ok(text) => println!("{text}"),
        Err(err) => error!("failed to render json: {err}"),
    }
    Ok(true)
}

fn clean(config: PathBuf) -> receipt_ledger::Result<bool> {
    let config = Config::from_path(&config)?;
    let removed = clean_workspaces(&config)?;
    info!(removed, "clean finished");
    Ok(true)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Aggregate {
            config,
            target,
            strict,
        } => aggregate(config, target, strict),
        Commands::Inspect { vendor, files } => inspect(&vendor, files),
        Commands::Clean { config } => clean(config),
    };
    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            error!("error-level diagnostics reported in strict mode");
            ExitCode::FAILURE
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

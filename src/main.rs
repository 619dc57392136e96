//! Dispatch loader utility

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dispatch_loader::cli::{Cli, Command, ExtensionAction, LoadArgs};
use dispatch_loader::config::AppConfig;
use dispatch_loader::database::Database;
use dispatch_loader::errors::DispatchError;
use dispatch_loader::pipeline::PipelineDriver;

#[tokio::main]
async fn main() -> ExitCode {
    #[cfg(feature = "dotenvy")]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_status())
        }
    }
}

async fn run(cli: Cli) -> Result<(), DispatchError> {
    // Configuration problems end the run before any network or database activity
    let mut config = AppConfig::load(&cli.config)?;

    match cli.into_command() {
        Command::Load(args) => load(&mut config, args).await,
        Command::InitSchema => {
            let mut database = Database::open(&config.database).await?;
            let result = init_schema(&mut database).await;
            database.close().await;
            result
        }
        Command::Extensions { action } => {
            let mut database = Database::open(&config.database).await?;
            let result = database
                .ensure_extensions(action == ExtensionAction::Enable)
                .await;
            database.close().await;
            result
        }
        Command::Status => {
            let mut database = Database::open(&config.database).await?;
            let result = status(&mut database).await;
            database.close().await;
            result
        }
    }
}

async fn load(config: &mut AppConfig, args: LoadArgs) -> Result<(), DispatchError> {
    if let Some(batch_size) = args.batch_size {
        config.loader.batch_size = batch_size;
    }
    if let Some(limit) = args.limit {
        config.api.limit = limit;
    }
    config.validate()?;

    let mut driver = PipelineDriver::new(config)?.reset_schema(args.reset_schema);
    let report = driver.run(&config.database).await?;

    info!(
        "Loaded {} of {} records ({} malformed, {} without coordinates, {} duplicates)",
        report.inserted,
        report.fetched,
        report.malformed,
        report.unmatched + report.geocode_failures - report.skipped,
        report.duplicates
    );
    println!("database records have been updated");
    Ok(())
}

async fn init_schema(database: &mut Database) -> Result<(), DispatchError> {
    database.ensure_schema().await?;
    database.ensure_indexes().await?;
    println!("table dispatch has been recreated");
    Ok(())
}

async fn status(database: &mut Database) -> Result<(), DispatchError> {
    let count = database.row_count().await?;
    match database.latest_dispatch_time().await? {
        Some(latest) => println!("{count} rows, most recent dispatch at {latest}"),
        None => println!("{count} rows"),
    }
    Ok(())
}

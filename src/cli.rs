//! Command line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::DEFAULT_CONFIG_PATH;

#[derive(Debug, Parser)]
#[command(
    name = "dispatch-loader",
    version,
    about = "Load geocoded dispatch events into PostgreSQL"
)]
pub struct Cli {
    /// Configuration file with database credentials and service settings
    #[arg(
        long,
        short,
        global = true,
        env = "DISPATCH_CONFIG",
        default_value = DEFAULT_CONFIG_PATH
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch one page of dispatch events and load it (default)
    Load(LoadArgs),
    /// Drop and recreate table dispatch. Deletes all stored rows.
    InitSchema,
    /// Enable or drop the geospatial extension
    Extensions {
        #[arg(value_enum)]
        action: ExtensionAction,
    },
    /// Show stored row count and most recent dispatch time
    Status,
}

#[derive(Debug, Default, clap::Args)]
pub struct LoadArgs {
    /// Rows per insert, overrides loader.batch_size
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Records to request from the API, overrides api.limit
    #[arg(long)]
    pub limit: Option<u32>,

    /// Drop and recreate the table before loading
    #[arg(long)]
    pub reset_schema: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExtensionAction {
    Enable,
    Disable,
}

impl Cli {
    /// Subcommand to run, `load` when none was given
    pub fn into_command(self) -> Command {
        self.command
            .unwrap_or_else(|| Command::Load(LoadArgs::default()))
    }
}

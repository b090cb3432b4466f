mod db;
mod list;
mod logging;
mod sync;

use clap::Parser;

pub use db::{CsvDb, Db, NullDb};
pub use logging::{init_logging, LogArgs, LogFormat, LogLevel};
pub use sync::Interrupted;

/// obsctl ingests measurement containers from the public archive and emits
/// normalized observation rows for analytical insertion.
#[derive(Debug, Parser)]
#[command(author, name = "obsctl", version)]
pub struct Obsctl {
    #[clap(subcommand)]
    pub subcommand: Subcommand,

    #[clap(flatten)]
    pub log_args: LogArgs,
}

#[derive(Debug, clap::Subcommand)]
#[clap(rename_all = "kebab-case")]
pub enum Subcommand {
    /// Process a date range of the archive into observation tables
    Sync(sync::SyncArgs),
    /// Print catalog entries for a date range as JSON lines
    List(list::ListArgs),
}

pub fn run_subcommand(cli: Obsctl) -> anyhow::Result<()> {
    init_logging(&cli.log_args);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = match cli.subcommand {
        Subcommand::Sync(args) => runtime.block_on(sync::run(args)),
        Subcommand::List(args) => runtime.block_on(list::run(args)),
    };
    if let Err(err) = result.as_ref() {
        tracing::error!(error = ?err, "subcommand failed");
    }
    result
}

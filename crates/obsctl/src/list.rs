//! The `list` subcommand: print catalog entries for a range as JSON lines.

use chrono::NaiveDate;
use futures::TryStreamExt;

use archive_client::{ArchiveClient, Filter};

#[derive(Debug, clap::Args)]
pub struct ListArgs {
    /// First day of the range, inclusive (YYYY-MM-DD).
    #[arg(long = "start-day")]
    pub start_day: NaiveDate,

    /// End of the range, exclusive (YYYY-MM-DD).
    #[arg(long = "end-day")]
    pub end_day: NaiveDate,

    /// Country filter, repeatable.
    #[arg(long = "country")]
    pub countries: Vec<String>,

    /// Test-name filter, repeatable.
    #[arg(long = "test-name")]
    pub test_names: Vec<String>,
}

pub async fn run(args: ListArgs) -> anyhow::Result<()> {
    let filter = Filter::new(
        args.countries,
        args.test_names,
        args.start_day,
        args.end_day,
    );
    let client = ArchiveClient::new_anonymous().await;

    let mut entries = std::pin::pin!(client.list_for_range(&filter));
    let mut count = 0u64;
    while let Some(entry) = entries.try_next().await? {
        println!("{}", serde_json::to_string(&entry)?);
        count += 1;
    }
    tracing::info!(entries = count, "listing complete");
    Ok(())
}

//! Client for the public measurement archive: object listing with filename
//! metadata parsing, and a size-validated local cache of downloaded
//! containers.

mod catalog;
mod fetch;

pub use self::catalog::{CatalogError, FileEntry, Filter};
pub use self::fetch::{FetchError, Fetched};

use aws_config::{BehaviorVersion, Region};

/// Bucket holding the legacy daily cans (through 2020-10-21).
pub const CAN_BUCKET: &str = "ooni-data";
/// Bucket holding minicans and the current JSONL stream.
pub const MC_BUCKET: &str = "ooni-data-eu-fra";

/// Handle on the archive's buckets. Cheap to clone; the underlying SDK
/// clients are reference counted.
#[derive(Clone)]
pub struct ArchiveClient {
    can_client: aws_sdk_s3::Client,
    mc_client: aws_sdk_s3::Client,
}

impl ArchiveClient {
    /// Connects with unsigned requests; the archive buckets are public and
    /// credentials are usually absent.
    pub async fn new_anonymous() -> ArchiveClient {
        let base = aws_config::defaults(BehaviorVersion::latest())
            .no_credentials()
            .load()
            .await;
        let can_conf = aws_sdk_s3::config::Builder::from(&base)
            .region(Region::new("us-east-1"))
            .build();
        let mc_conf = aws_sdk_s3::config::Builder::from(&base)
            .region(Region::new("eu-central-1"))
            .build();
        ArchiveClient {
            can_client: aws_sdk_s3::Client::from_conf(can_conf),
            mc_client: aws_sdk_s3::Client::from_conf(mc_conf),
        }
    }

    fn client_for(&self, bucket: &str) -> &aws_sdk_s3::Client {
        if bucket == CAN_BUCKET {
            &self.can_client
        } else {
            &self.mc_client
        }
    }
}

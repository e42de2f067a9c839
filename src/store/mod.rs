use std::fmt;

use async_trait::async_trait;

use super::error::Error;
use super::file_entry::FileEntry;

#[cfg(test)]
pub mod memory;
pub mod s3;

pub use self::s3::S3Store;

/// Top level of a bucket as seen through a `/`-delimited listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub prefixes: Vec<String>,
    pub objects: Vec<(String, u64)>,
}

impl Listing {
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.prefixes
            .iter()
            .map(String::as_str)
            .chain(self.objects.iter().map(|(k, _)| k.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty() && self.objects.is_empty()
    }
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for prefix in &self.prefixes {
            writeln!(f, "{:>12} {}", "PRE", prefix)?;
        }
        for (key, size) in &self.objects {
            writeln!(f, "{:>12} {}", size, key)?;
        }
        Ok(())
    }
}

/// Object storage operations the bucket manager needs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// Every key starting with `prefix`; the empty prefix lists the whole bucket.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, Error>;

    async fn list_top_level(&self) -> Result<Listing, Error>;

    async fn delete_keys(&self, keys: &[String]) -> Result<(), Error>;

    async fn put_file(&self, key: &str, file: &FileEntry) -> Result<(), Error>;
}

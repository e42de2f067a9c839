//! Moves the pipeline bucket between its empty, seeded and dirty states.

use futures::prelude::*;

use super::error::{Error, PrefixFailure};
use super::layout::{self, BucketState};
use super::seed::SeedSource;
use super::store::{Listing, ObjectStore};

/// Outcome of a manager operation, including the final top-level listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub state: BucketState,
    pub listing: Listing,
    pub deleted: usize,
    pub uploaded: usize,
}

pub struct BucketStateManager<S> {
    store: S,
    working_prefixes: Vec<String>,
    /// Built-in working prefixes plus any configured extras. Status always
    /// classifies against the full set, whatever subset clean targets.
    known_prefixes: Vec<String>,
    concurrency: usize,
}

impl<S> BucketStateManager<S>
where
    S: ObjectStore,
{
    pub fn new(store: S, working_prefixes: Vec<String>, concurrency: usize) -> Self {
        let mut known_prefixes = layout::default_working_prefixes();
        for prefix in &working_prefixes {
            if !known_prefixes.contains(prefix) {
                known_prefixes.push(prefix.clone());
            }
        }
        Self {
            store,
            working_prefixes,
            known_prefixes,
            concurrency: concurrency.max(1),
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Deletes every object in the bucket, then uploads the seed tree.
    pub async fn reset(&self, seed: &SeedSource) -> Result<Report, Error> {
        let bucket = self.store.bucket();
        tracing::info!(
            bucket,
            seed_dir = %seed.root().display(),
            objects = seed.objects().len(),
            bytes = seed.total_bytes(),
            "resetting bucket"
        );

        let deleted = self
            .delete_prefix("")
            .await
            .map_err(|e| Error::step("delete all objects", e))?;

        let total = seed.objects().len();
        for (uploaded, object) in seed.objects().iter().enumerate() {
            tracing::debug!(key = %object.key, size = object.entry.size(), "uploading");
            if let Err(cause) = self.store.put_file(&object.key, &object.entry).await {
                tracing::warn!(
                    bucket,
                    key = %object.key,
                    uploaded,
                    total,
                    "upload failed after delete, bucket holds a partial seed"
                );
                return Err(Error::PartialUpload {
                    key: object.key.clone(),
                    uploaded,
                    total,
                    cause: Box::new(cause),
                });
            }
        }
        tracing::info!(bucket, deleted, uploaded = total, "reset complete");

        let mut report = self.status().await?;
        report.deleted = deleted;
        report.uploaded = total;
        Ok(report)
    }

    /// Empties every working prefix. Prefixes are cleaned independently and
    /// all of them are attempted even when some fail.
    pub async fn clean(&self) -> Result<Report, Error> {
        let bucket = self.store.bucket();
        tracing::info!(bucket, prefixes = ?self.working_prefixes, "cleaning working prefixes");

        let outcomes: Vec<(String, Result<usize, Error>)> =
            stream::iter(self.working_prefixes.iter().cloned())
                .map(|prefix| async move {
                    let outcome = self.delete_prefix(&prefix).await;
                    (prefix, outcome)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        let mut deleted = 0;
        let mut failures = Vec::new();
        for (prefix, outcome) in outcomes {
            match outcome {
                Ok(count) => {
                    tracing::info!(bucket, prefix = %prefix, deleted = count, "prefix cleaned");
                    deleted += count;
                }
                Err(cause) => {
                    tracing::error!(bucket, prefix = %prefix, error = %cause, "prefix clean failed");
                    failures.push(PrefixFailure { prefix, cause });
                }
            }
        }
        if !failures.is_empty() {
            failures.sort_by(|a, b| a.prefix.cmp(&b.prefix));
            return Err(Error::CleanFailed(failures));
        }
        tracing::info!(bucket, deleted, "clean complete");

        let mut report = self.status().await?;
        report.deleted = deleted;
        Ok(report)
    }

    /// Lists the top level and classifies the bucket without changing it.
    pub async fn status(&self) -> Result<Report, Error> {
        let listing = self
            .store
            .list_top_level()
            .await
            .map_err(|e| Error::step("list top level", e))?;
        let state = layout::classify(listing.keys(), &self.known_prefixes);
        Ok(Report {
            state,
            listing,
            deleted: 0,
            uploaded: 0,
        })
    }

    /// Deletes the objects returned by a listing of `prefix`, so keys outside
    /// the prefix are never touched.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, Error> {
        let keys = self.store.list_keys(prefix).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        self.store.delete_keys(&keys).await?;
        Ok(keys.len())
    }
}

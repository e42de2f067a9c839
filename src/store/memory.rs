//! In-memory bucket for exercising the manager without S3.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Listing, ObjectStore};
use crate::error::{Error, Kind};
use crate::file_entry::FileEntry;

#[derive(Default)]
pub struct MemoryStore {
    bucket: String,
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    failing_prefixes: Mutex<BTreeSet<String>>,
    failing_puts: Mutex<BTreeSet<String>>,
}

impl MemoryStore {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            ..Default::default()
        }
    }

    pub fn with_objects(bucket: &str, keys: &[&str]) -> Self {
        let store = Self::new(bucket);
        for key in keys {
            store.insert(key, key.as_bytes());
        }
        store
    }

    pub fn insert(&self, key: &str, body: &[u8]) {
        self.objects.lock().unwrap().insert(key.to_string(), body.to_vec());
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn body(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Deletes of keys under `prefix` fail with permission denied.
    pub fn deny_delete(&self, prefix: &str) {
        self.failing_prefixes.lock().unwrap().insert(prefix.to_string());
    }

    pub fn fail_put(&self, key: &str) {
        self.failing_puts.lock().unwrap().insert(key.to_string());
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let objects = self.objects.lock().unwrap();
        Ok(objects.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }

    async fn list_top_level(&self) -> Result<Listing, Error> {
        let objects = self.objects.lock().unwrap();
        let mut listing = Listing::default();
        for (key, body) in objects.iter() {
            match key.find('/') {
                Some(i) => {
                    let prefix = &key[..=i];
                    if !listing.prefixes.iter().any(|p| p == prefix) {
                        listing.prefixes.push(prefix.to_string());
                    }
                }
                None => listing.objects.push((key.clone(), body.len() as u64)),
            }
        }
        Ok(listing)
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<(), Error> {
        let failing = self.failing_prefixes.lock().unwrap().clone();
        if let Some(key) = keys.iter().find(|k| failing.iter().any(|p| k.starts_with(p.as_str()))) {
            return Err(Error::remote(Kind::PermissionDenied, format!("AccessDenied: {}", key)));
        }
        let mut objects = self.objects.lock().unwrap();
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }

    async fn put_file(&self, key: &str, file: &FileEntry) -> Result<(), Error> {
        if self.failing_puts.lock().unwrap().contains(key) {
            return Err(Error::remote(Kind::Transient, format!("connection reset putting {}", key)));
        }
        let body = std::fs::read(file.path())?;
        self.insert(key, &body);
        Ok(())
    }
}

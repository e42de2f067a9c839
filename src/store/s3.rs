use async_trait::async_trait;
use futures::compat::*;
use futures::prelude::*;

use rusoto_s3::{
    AbortMultipartUploadRequest, CompleteMultipartUploadRequest, CompletedMultipartUpload,
    CompletedPart, CreateMultipartUploadRequest, Delete, DeleteObjectsOutput,
    DeleteObjectsRequest, ListObjectsV2Output, ListObjectsV2Request, ObjectIdentifier,
    PutObjectRequest, S3Client, UploadPartOutput, UploadPartRequest, S3,
};

use super::{Listing, ObjectStore};
use crate::error::{kind_of_code, Error, Kind};
use crate::file_entry::FileEntry;
use crate::mmap;
use crate::retry::{with_retry, Policy};

/// DeleteObjects accepts at most this many keys per request.
const DELETE_BATCH: usize = 1000;

pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct UploadTuning {
    pub multipart_threshold: u64,
    pub part_size: usize,
    pub part_concurrency: usize,
}

impl Default for UploadTuning {
    fn default() -> Self {
        Self {
            multipart_threshold: 64 * 1024 * 1024,
            part_size: 16 * 1024 * 1024,
            part_concurrency: 8,
        }
    }
}

#[derive(Clone)]
pub struct S3Store {
    client: S3Client,
    bucket: String,
    policy: Policy,
    upload: UploadTuning,
}

impl S3Store {
    pub fn new(client: S3Client, bucket: String, policy: Policy, upload: UploadTuning) -> Self {
        Self { client, bucket, policy, upload }
    }

    async fn list_page(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation_token: Option<String>,
    ) -> Result<ListObjectsV2Output, Error> {
        with_retry(&self.policy, "list objects", || {
            let req = ListObjectsV2Request {
                bucket: self.bucket.clone(),
                prefix: Some(prefix.to_string()).filter(|p| !p.is_empty()),
                delimiter: delimiter.map(str::to_string),
                continuation_token: continuation_token.clone(),
                ..Default::default()
            };
            self.client.list_objects_v2(req).compat().map_err(Error::from)
        })
        .await
    }

    async fn delete_batch(&self, batch: &[String]) -> Result<(), Error> {
        with_retry(&self.policy, "delete objects", || {
            let objects = batch
                .iter()
                .map(|key| ObjectIdentifier {
                    key: key.clone(),
                    ..Default::default()
                })
                .collect();
            let req = DeleteObjectsRequest {
                bucket: self.bucket.clone(),
                delete: Delete {
                    objects,
                    quiet: Some(true),
                },
                ..Default::default()
            };
            let total = batch.len();
            self.client
                .delete_objects(req)
                .compat()
                .map_err(Error::from)
                .and_then(move |out| future::ready(check_deleted(out, total)))
        })
        .await
    }

    async fn put_whole(&self, key: &str, file: &FileEntry) -> Result<(), Error> {
        let body = file.read().await?;
        tracing::debug!(key, path = %file.path().display(), size = body.len(), "put object");
        let op = format!("put {}", key);
        with_retry(&self.policy, &op, || {
            let req = PutObjectRequest {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                content_length: Some(body.len() as i64),
                body: Some(body.clone().into()),
                ..Default::default()
            };
            self.client.put_object(req).compat().map_err(Error::from)
        })
        .await?;
        Ok(())
    }

    async fn put_multipart(&self, key: &str, file: &FileEntry) -> Result<(), Error> {
        let handle = file.map()?;
        let op = format!("create multipart upload {}", key);
        let created = with_retry(&self.policy, &op, || {
            let req = CreateMultipartUploadRequest {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                ..Default::default()
            };
            self.client.create_multipart_upload(req).compat().map_err(Error::from)
        })
        .await?;
        let upload_id = created
            .upload_id
            .ok_or_else(|| Error::remote(Kind::Other, "no upload_id in response"))?;

        let result = match self.upload_parts(key, &upload_id, handle).await {
            Ok(parts) => self.complete(key, &upload_id, parts).await,
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.abort(key, &upload_id).await;
        }
        result
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        handle: mmap::Handle,
    ) -> Result<Vec<CompletedPart>, Error> {
        let chunks = mmap::Chunker::new(handle, self.upload.part_size)
            .enumerate()
            .map(|(i, chunk)| (i as i64 + 1, chunk));
        let mut parts: Vec<CompletedPart> = stream::iter(chunks)
            .map(|(part_number, chunk)| {
                let op = format!("upload part {} of {}", part_number, key);
                async move {
                    let UploadPartOutput { e_tag, .. } = with_retry(&self.policy, &op, || {
                        let req = UploadPartRequest {
                            body: Some(chunk.to_vec().into()),
                            bucket: self.bucket.clone(),
                            key: key.to_string(),
                            content_length: Some(chunk.len() as i64),
                            part_number,
                            upload_id: upload_id.to_string(),
                            ..Default::default()
                        };
                        self.client.upload_part(req).compat().map_err(Error::from)
                    })
                    .await?;
                    tracing::debug!(key, part_number, "uploaded part");
                    Ok::<_, Error>(CompletedPart {
                        e_tag,
                        part_number: Some(part_number),
                    })
                }
            })
            .buffer_unordered(self.upload.part_concurrency.max(1))
            .try_collect()
            .await?;
        parts.sort_by_key(|part| part.part_number);
        Ok(parts)
    }

    async fn complete(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<(), Error> {
        let op = format!("complete multipart upload {}", key);
        with_retry(&self.policy, &op, || {
            let req = CompleteMultipartUploadRequest {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                multipart_upload: Some(CompletedMultipartUpload {
                    parts: Some(parts.clone()),
                }),
                upload_id: upload_id.to_string(),
                ..Default::default()
            };
            self.client.complete_multipart_upload(req).compat().map_err(Error::from)
        })
        .await?;
        Ok(())
    }

    async fn abort(&self, key: &str, upload_id: &str) {
        let op = format!("abort multipart upload {}", key);
        let aborted = with_retry(&self.policy, &op, || {
            let req = AbortMultipartUploadRequest {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                upload_id: upload_id.to_string(),
                ..Default::default()
            };
            self.client.abort_multipart_upload(req).compat().map_err(Error::from)
        })
        .await;
        if let Err(e) = aborted {
            tracing::warn!(key, upload_id, error = %e, "abort multipart upload failed");
        }
    }
}

fn check_deleted(out: DeleteObjectsOutput, total: usize) -> Result<(), Error> {
    let errors = out.errors.unwrap_or_default();
    let first = match errors.first() {
        None => return Ok(()),
        Some(first) => first,
    };
    let code = first.code.clone().unwrap_or_default();
    Err(Error::remote(
        kind_of_code(&code),
        format!(
            "{} of {} deletes failed, first {}: {} {}",
            errors.len(),
            total,
            first.key.clone().unwrap_or_default(),
            code,
            first.message.clone().unwrap_or_default()
        ),
    ))
}

#[async_trait]
impl ObjectStore for S3Store {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let mut keys = Vec::new();
        let mut token = None;
        loop {
            let page = self.list_page(prefix, None, token.take()).await?;
            keys.extend(
                page.contents
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|object| object.key),
            );
            match page.next_continuation_token {
                Some(next) if page.is_truncated == Some(true) => token = Some(next),
                _ => break,
            }
        }
        Ok(keys)
    }

    async fn list_top_level(&self) -> Result<Listing, Error> {
        let mut listing = Listing::default();
        let mut token = None;
        loop {
            let page = self.list_page("", Some("/"), token.take()).await?;
            listing.prefixes.extend(
                page.common_prefixes
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|p| p.prefix),
            );
            listing.objects.extend(
                page.contents
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|o| {
                        let size = o.size.unwrap_or(0).max(0) as u64;
                        o.key.map(|key| (key, size))
                    }),
            );
            match page.next_continuation_token {
                Some(next) if page.is_truncated == Some(true) => token = Some(next),
                _ => break,
            }
        }
        Ok(listing)
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<(), Error> {
        for batch in keys.chunks(DELETE_BATCH) {
            self.delete_batch(batch).await?;
            tracing::debug!(bucket = %self.bucket, count = batch.len(), "deleted batch");
        }
        Ok(())
    }

    async fn put_file(&self, key: &str, file: &FileEntry) -> Result<(), Error> {
        if file.size() > 0 && file.size() >= self.upload.multipart_threshold {
            self.put_multipart(key, file).await
        } else {
            self.put_whole(key, file).await
        }
    }
}

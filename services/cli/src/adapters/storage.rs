//! services/cli/src/adapters/storage.rs
//!
//! Implementation of the `BlobStore` port against the hosted object store.
//! Uploads stream the file body in fixed-size chunks so byte-level progress
//! can be reported while the transfer is in flight.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::Body;
use studyshelf_core::domain::{LocalFile, TransferProgress};
use studyshelf_core::ports::{BlobStore, PortError, PortResult, TransferEvents};
use tokio::sync::mpsc;

use crate::adapters::{check, Backend};

/// Body chunk size. Small enough for responsive progress, large enough to
/// keep per-chunk overhead negligible.
const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// An adapter that implements `BlobStore` for one storage bucket.
pub struct SupabaseStorage {
    backend: Backend,
    bucket: String,
}

impl SupabaseStorage {
    pub fn new(backend: Backend, bucket: String) -> Self {
        Self { backend, bucket }
    }

    fn object_url(&self, key: &str) -> PortResult<reqwest::Url> {
        self.backend
            .endpoint(&format!("storage/v1/object/{}/{key}", self.bucket))
    }
}

/// The content type sent with an uploaded object, from its file name.
pub(crate) fn content_type_for(name: &str) -> &'static str {
    match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl BlobStore for SupabaseStorage {
    /// Streams the file under `key`, yielding cumulative byte counts as the
    /// body is consumed by the transport. The returned stream ends once the
    /// backend acknowledges the object.
    async fn upload(
        &self,
        key: &str,
        file: &LocalFile,
        access_token: &str,
    ) -> PortResult<TransferEvents> {
        let total = file.size();
        let mut remaining = file.data.clone();
        let (progress_tx, mut progress_rx) = mpsc::channel::<u64>(16);

        // The body stream owns the bytes and the progress sender; progress
        // is reported as the transport pulls chunks, not when we enqueue
        // them. A dropped receiver just stops the reporting.
        let body = async_stream::stream! {
            let mut sent: u64 = 0;
            while !remaining.is_empty() {
                let take = remaining.len().min(UPLOAD_CHUNK_BYTES);
                let chunk: Bytes = remaining.split_to(take);
                sent += chunk.len() as u64;
                let _ = progress_tx.send(sent).await;
                yield Ok::<Bytes, std::convert::Infallible>(chunk);
            }
        };

        let request = self
            .backend
            .client
            .post(self.object_url(key)?)
            .header("apikey", &self.backend.anon_key)
            .bearer_auth(access_token)
            .header(CONTENT_TYPE, content_type_for(&file.name))
            .header("x-upsert", "false")
            .body(Body::wrap_stream(body));

        let mut pending = tokio::spawn(async move {
            let res = request
                .send()
                .await
                .map_err(|e| PortError::Unexpected(e.to_string()))?;
            check(res).await.map(|_| ())
        });

        let events = async_stream::stream! {
            loop {
                tokio::select! {
                    Some(sent) = progress_rx.recv() => {
                        yield Ok(TransferProgress { transferred: sent, total });
                    }
                    result = &mut pending => {
                        // Drain whatever progress arrived before completion
                        // so the final 100% is not lost.
                        while let Ok(sent) = progress_rx.try_recv() {
                            yield Ok(TransferProgress { transferred: sent, total });
                        }
                        match result {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => yield Err(e),
                            Err(e) => {
                                yield Err(PortError::Unexpected(format!("upload task failed: {e}")));
                            }
                        }
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(events))
    }

    fn public_url(&self, key: &str) -> String {
        let base = self.backend.base.as_str().trim_end_matches('/');
        format!("{base}/storage/v1/object/public/{}/{key}", self.bucket)
    }

    /// Deletes objects by key. Used for compensating removal after a failed
    /// insert and when an admin deletes a note.
    async fn remove(&self, keys: &[String], access_token: &str) -> PortResult<()> {
        let endpoint = self
            .backend
            .endpoint(&format!("storage/v1/object/{}", self.bucket))?;
        let res = self
            .backend
            .client
            .delete(endpoint)
            .header("apikey", &self.backend.anon_key)
            .bearer_auth(access_token)
            .json(&serde_json::json!({ "prefixes": keys }))
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        check(res).await.map(|_| ())
    }
}

//! crates/studyshelf_core/src/upload.rs
//!
//! Sequential multi-file upload: each file is streamed to the blob store
//! under a fresh key, then one metadata row is registered for it. The batch
//! stops at the first failure, keeping whatever already completed.

use std::sync::Arc;

use async_stream::try_stream;
use chrono::Utc;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::{BatchMetadata, LocalFile, NewNote, Session};
use crate::ports::{BlobStore, NoteStore, PortError};

/// Per-file size ceiling: 50 MiB. Uploads above this are rejected at the
/// file's turn in the batch, before any transfer of that file starts.
pub const MAX_FILE_BYTES: u64 = 50 * 1024 * 1024;

/// Everything that can end a batch early. Precondition errors surface
/// before any network call is made.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("no files selected")]
    EmptyBatch,
    #[error("not signed in")]
    NotAuthenticated,
    #[error("{name} is larger than the {} MiB upload limit", MAX_FILE_BYTES / (1024 * 1024))]
    FileTooLarge { name: String },
    #[error("upload of {name} failed: {source}")]
    Transfer { name: String, source: PortError },
    #[error("could not register {name}: {source}")]
    Insert { name: String, source: PortError },
    #[error("upload cancelled")]
    Cancelled,
}

/// Progress and completion events emitted while a batch runs.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    FileStarted {
        index: usize,
        total: usize,
        name: String,
    },
    /// The fraction is derived solely from the named file's own transferred
    /// and total byte counts, never from other files in the batch.
    FileProgress {
        index: usize,
        total: usize,
        fraction: f64,
    },
    FileUploaded {
        index: usize,
        total: usize,
        url: String,
    },
    Completed {
        uploaded: usize,
    },
}

/// Uploads ordered batches of local files, one file in flight at a time.
pub struct UploadPipeline {
    blobs: Arc<dyn BlobStore>,
    notes: Arc<dyn NoteStore>,
}

impl UploadPipeline {
    pub fn new(blobs: Arc<dyn BlobStore>, notes: Arc<dyn NoteStore>) -> Self {
        Self { blobs, notes }
    }

    /// Runs one batch, lazily: nothing is validated or transferred until the
    /// returned stream is polled. Events arrive in order; an `Err` item
    /// terminates the stream and no further files are attempted.
    ///
    /// Resubmitting the same files produces new, time-based storage keys and
    /// therefore duplicate records; callers own deduplication if they want
    /// it. Cancellation is observed between files.
    pub fn submit(
        &self,
        session: Option<Session>,
        metadata: BatchMetadata,
        files: Vec<LocalFile>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<BatchEvent, UploadError>> + Send + 'static {
        let blobs = Arc::clone(&self.blobs);
        let notes = Arc::clone(&self.notes);

        try_stream! {
            let session = session.ok_or(UploadError::NotAuthenticated)?;
            if files.is_empty() {
                Err(UploadError::EmptyBatch)?;
            }

            let total = files.len();
            for (index, file) in files.into_iter().enumerate() {
                if cancel.is_cancelled() {
                    Err(UploadError::Cancelled)?;
                }
                if file.size() > MAX_FILE_BYTES {
                    Err(UploadError::FileTooLarge { name: file.name.clone() })?;
                }

                yield BatchEvent::FileStarted {
                    index,
                    total,
                    name: file.name.clone(),
                };

                let key = file.storage_key(Utc::now().timestamp_millis(), index);

                let mut transfer = blobs
                    .upload(&key, &file, &session.access_token)
                    .await
                    .map_err(|source| UploadError::Transfer {
                        name: file.name.clone(),
                        source,
                    })?;
                while let Some(progress) = transfer.next().await {
                    let progress = progress.map_err(|source| UploadError::Transfer {
                        name: file.name.clone(),
                        source,
                    })?;
                    yield BatchEvent::FileProgress {
                        index,
                        total,
                        fraction: progress.fraction(),
                    };
                }

                let url = blobs.public_url(&key);
                let note = NewNote {
                    written_by: metadata.written_by.clone(),
                    subject: metadata.subject.clone(),
                    semester: metadata.semester,
                    exam_type: metadata.kind,
                    file_url: url.clone(),
                    user_id: session.user_id,
                };
                if let Err(source) = notes.insert_note(note).await {
                    // The blob is already stored; take it back out so a
                    // failed insert does not strand an unreachable object.
                    if let Err(e) = blobs
                        .remove(std::slice::from_ref(&key), &session.access_token)
                        .await
                    {
                        warn!(error = %e, key = %key, "orphaned blob left behind after failed insert");
                    }
                    Err(UploadError::Insert {
                        name: file.name.clone(),
                        source,
                    })?;
                }

                info!(file = %file.name, key = %key, "note uploaded");
                yield BatchEvent::FileUploaded { index, total, url };
            }

            yield BatchEvent::Completed { uploaded: total };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        MaterialKind, NoteFilter, NotePatch, NoteRecord, Semester, TransferProgress,
    };
    use crate::ports::{PortResult, TransferEvents};
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::{Duration, Utc};
    use std::sync::Mutex;
    use uuid::Uuid;

    fn session() -> Session {
        Session {
            user_id: Uuid::new_v4(),
            email: "admin@college.edu".to_string(),
            access_token: "token".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    fn metadata() -> BatchMetadata {
        BatchMetadata {
            subject: "Physics".to_string(),
            written_by: "Prof. Smith".to_string(),
            semester: Semester::new(3).unwrap(),
            kind: MaterialKind::ClassNote,
        }
    }

    fn file(name: &str, size: usize) -> LocalFile {
        LocalFile {
            name: name.to_string(),
            data: Bytes::from(vec![0u8; size]),
        }
    }

    #[derive(Default)]
    struct FakeBlobs {
        uploaded: Mutex<Vec<String>>,
        removed: Mutex<Vec<String>>,
        fail_upload_for: Option<String>,
    }

    #[async_trait]
    impl BlobStore for FakeBlobs {
        async fn upload(
            &self,
            key: &str,
            file: &LocalFile,
            _access_token: &str,
        ) -> PortResult<TransferEvents> {
            if self.fail_upload_for.as_deref() == Some(file.name.as_str()) {
                return Err(PortError::Unexpected("connection reset".into()));
            }
            self.uploaded.lock().unwrap().push(key.to_string());
            let total = file.size();
            Ok(Box::pin(futures::stream::iter(vec![
                Ok(TransferProgress { transferred: total / 2, total }),
                Ok(TransferProgress { transferred: total, total }),
            ])))
        }

        fn public_url(&self, key: &str) -> String {
            format!("https://blob.test/notes/{key}")
        }

        async fn remove(&self, keys: &[String], _access_token: &str) -> PortResult<()> {
            self.removed.lock().unwrap().extend_from_slice(keys);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeNotes {
        inserted: Mutex<Vec<NewNote>>,
        fail_insert: bool,
    }

    #[async_trait]
    impl NoteStore for FakeNotes {
        async fn insert_note(&self, note: NewNote) -> PortResult<NoteRecord> {
            if self.fail_insert {
                return Err(PortError::Unexpected("row level security".into()));
            }
            let record = NoteRecord {
                id: Uuid::new_v4(),
                written_by: note.written_by.clone(),
                subject: note.subject.clone(),
                semester: note.semester,
                exam_type: note.exam_type,
                file_url: note.file_url.clone(),
                is_pinned: false,
                user_id: Some(note.user_id),
                created_at: Utc::now(),
            };
            self.inserted.lock().unwrap().push(note);
            Ok(record)
        }

        async fn list_notes(&self, _filter: NoteFilter) -> PortResult<Vec<NoteRecord>> {
            Ok(Vec::new())
        }

        async fn update_note(&self, _id: Uuid, _patch: NotePatch) -> PortResult<()> {
            Ok(())
        }

        async fn set_pinned(&self, _id: Uuid, _pinned: bool) -> PortResult<()> {
            Ok(())
        }

        async fn delete_note(&self, _id: Uuid) -> PortResult<()> {
            Ok(())
        }
    }

    async fn collect(
        pipeline: &UploadPipeline,
        session: Option<Session>,
        files: Vec<LocalFile>,
    ) -> Vec<Result<BatchEvent, UploadError>> {
        pipeline
            .submit(session, metadata(), files, CancellationToken::new())
            .collect()
            .await
    }

    #[tokio::test]
    async fn empty_batch_is_rejected_before_any_store_call() {
        let blobs = Arc::new(FakeBlobs::default());
        let notes = Arc::new(FakeNotes::default());
        let pipeline = UploadPipeline::new(blobs.clone(), notes.clone());

        let events = collect(&pipeline, Some(session()), Vec::new()).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Err(UploadError::EmptyBatch)));
        assert!(blobs.uploaded.lock().unwrap().is_empty());
        assert!(notes.inserted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_session_is_a_precondition_error() {
        let blobs = Arc::new(FakeBlobs::default());
        let pipeline = UploadPipeline::new(blobs.clone(), Arc::new(FakeNotes::default()));

        let events = collect(&pipeline, None, vec![file("a.pdf", 10)]).await;
        assert!(matches!(events[0], Err(UploadError::NotAuthenticated)));
        assert!(blobs.uploaded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn full_batch_inserts_one_record_per_file_with_distinct_keys() {
        let blobs = Arc::new(FakeBlobs::default());
        let notes = Arc::new(FakeNotes::default());
        let pipeline = UploadPipeline::new(blobs.clone(), notes.clone());

        let events = collect(
            &pipeline,
            Some(session()),
            vec![file("a.pdf", 8), file("b.pdf", 8), file("c.pdf", 8)],
        )
        .await;

        let last = events.last().unwrap().as_ref().unwrap();
        assert_eq!(last, &BatchEvent::Completed { uploaded: 3 });

        let keys = blobs.uploaded.lock().unwrap().clone();
        assert_eq!(keys.len(), 3);
        let mut deduped = keys.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), 3, "storage keys must be distinct: {keys:?}");

        let inserted = notes.inserted.lock().unwrap();
        assert_eq!(inserted.len(), 3);
        for (note, key) in inserted.iter().zip(&keys) {
            assert_eq!(note.file_url, format!("https://blob.test/notes/{key}"));
            assert_eq!(note.subject, "Physics");
            assert_eq!(note.exam_type, MaterialKind::ClassNote);
        }
    }

    #[tokio::test]
    async fn oversized_file_aborts_after_exactly_the_preceding_files() {
        let blobs = Arc::new(FakeBlobs::default());
        let notes = Arc::new(FakeNotes::default());
        let pipeline = UploadPipeline::new(blobs.clone(), notes.clone());

        // a.pdf fits, b.pdf does not: a must fully complete, b must be named.
        let big = LocalFile {
            name: "b.pdf".to_string(),
            data: Bytes::from(vec![0u8; (MAX_FILE_BYTES + 1) as usize]),
        };
        let events = collect(&pipeline, Some(session()), vec![file("a.pdf", 16), big]).await;

        match events.last().unwrap() {
            Err(UploadError::FileTooLarge { name }) => assert_eq!(name, "b.pdf"),
            other => panic!("expected FileTooLarge, got {other:?}"),
        }
        assert_eq!(blobs.uploaded.lock().unwrap().len(), 1);
        assert_eq!(notes.inserted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transfer_failure_names_the_file_and_stops_the_batch() {
        let blobs = Arc::new(FakeBlobs {
            fail_upload_for: Some("b.pdf".to_string()),
            ..FakeBlobs::default()
        });
        let notes = Arc::new(FakeNotes::default());
        let pipeline = UploadPipeline::new(blobs.clone(), notes.clone());

        let events = collect(
            &pipeline,
            Some(session()),
            vec![file("a.pdf", 16), file("b.pdf", 16), file("c.pdf", 16)],
        )
        .await;

        match events.last().unwrap() {
            Err(UploadError::Transfer { name, .. }) => assert_eq!(name, "b.pdf"),
            other => panic!("expected Transfer error, got {other:?}"),
        }
        // c.pdf was never attempted; a.pdf's work is preserved.
        assert_eq!(blobs.uploaded.lock().unwrap().len(), 1);
        assert_eq!(notes.inserted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn progress_fractions_come_from_the_file_itself() {
        let pipeline = UploadPipeline::new(
            Arc::new(FakeBlobs::default()),
            Arc::new(FakeNotes::default()),
        );

        // Wildly different sizes; both must report 0.5 then 1.0.
        let events = collect(
            &pipeline,
            Some(session()),
            vec![file("small.pdf", 10), file("large.pdf", 10_000)],
        )
        .await;

        let fractions: Vec<(usize, f64)> = events
            .iter()
            .filter_map(|e| match e {
                Ok(BatchEvent::FileProgress { index, fraction, .. }) => Some((*index, *fraction)),
                _ => None,
            })
            .collect();
        assert_eq!(fractions, vec![(0, 0.5), (0, 1.0), (1, 0.5), (1, 1.0)]);
    }

    #[tokio::test]
    async fn failed_insert_removes_the_uploaded_blob_and_surfaces_the_error() {
        let blobs = Arc::new(FakeBlobs::default());
        let notes = Arc::new(FakeNotes { fail_insert: true, ..FakeNotes::default() });
        let pipeline = UploadPipeline::new(blobs.clone(), notes);

        let events = collect(&pipeline, Some(session()), vec![file("a.pdf", 16)]).await;

        match events.last().unwrap() {
            Err(UploadError::Insert { name, .. }) => assert_eq!(name, "a.pdf"),
            other => panic!("expected Insert error, got {other:?}"),
        }
        let uploaded = blobs.uploaded.lock().unwrap().clone();
        let removed = blobs.removed.lock().unwrap().clone();
        assert_eq!(uploaded, removed, "the orphaned blob must be removed");
    }

    #[tokio::test]
    async fn cancellation_stops_the_batch_between_files() {
        let blobs = Arc::new(FakeBlobs::default());
        let notes = Arc::new(FakeNotes::default());
        let pipeline = UploadPipeline::new(blobs.clone(), notes.clone());

        let cancel = CancellationToken::new();
        let mut stream = Box::pin(pipeline.submit(
            Some(session()),
            metadata(),
            vec![file("a.pdf", 16), file("b.pdf", 16)],
            cancel.clone(),
        ));

        let mut saw_first_done = false;
        while let Some(event) = stream.next().await {
            match event {
                Ok(BatchEvent::FileUploaded { index: 0, .. }) => {
                    saw_first_done = true;
                    cancel.cancel();
                }
                Ok(_) => {}
                Err(UploadError::Cancelled) => break,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert!(saw_first_done);
        assert_eq!(blobs.uploaded.lock().unwrap().len(), 1);
        assert_eq!(notes.inserted.lock().unwrap().len(), 1);
    }
}

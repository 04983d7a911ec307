//! The upload workflow: initialize objects, load a file, submit it as a new
//! record, and keep the displayed record list in sync with the server.
//!
//! One submission moves through
//! `Idle → FileSelected → FileLoaded → Submitting → Idle`. A failed
//! submission records its message in the error region and does not refresh;
//! a successful one refreshes the list exactly once.

use crate::{
    models::{
        bucket::CollectionId,
        record::{OriginalFile, RecordAttributes, RecordId},
    },
    services::{
        file_loader::{FileLoader, LoadedFile, LoaderError, guess_mimetype, sha256_hex},
        initializer::{InitReport, ensure_objects},
        kinto_client::{AttachmentUpload, KintoClient, KintoError},
        renderer::{PageView, RecordRow},
    },
};
use bytes::Bytes;
use flate2::{Compression, write::GzEncoder};
use std::{
    fmt,
    future::Future,
    io::{self, Write},
    path::Path,
};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum WorkflowState {
    Idle,
    FileSelected { filename: String },
    FileLoaded(LoadedFile),
    Submitting { filename: String },
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowState::Idle => f.write_str("idle"),
            WorkflowState::FileSelected { filename } => write!(f, "loading `{filename}`"),
            WorkflowState::FileLoaded(file) => write!(f, "`{}` ready", file.filename),
            WorkflowState::Submitting { filename } => write!(f, "submitting `{filename}`"),
        }
    }
}

/// How the attachment content is encoded before upload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Encoding {
    #[default]
    Identity,
    /// Gzip the content and describe the uncompressed file in `original`.
    Gzip,
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("bucket and collections must be initialized before listing records")]
    NotInitialized,
    #[error("no file is loaded: select a file and wait for it to load")]
    NotReady,
    #[error("failed to compress `{filename}`: {source}")]
    Compress {
        filename: String,
        #[source]
        source: io::Error,
    },
    /// The record exists on the server even though this is an error.
    #[error("record {record} was created, but the list could not be refreshed: {source}")]
    Refresh {
        record: RecordId,
        #[source]
        source: Box<WorkflowError>,
    },
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error(transparent)]
    Kinto(#[from] KintoError),
}

#[derive(Debug)]
pub struct UploadWorkflow {
    client: KintoClient,
    bucket: String,
    collection: CollectionId,
    loader: FileLoader,
    state: WorkflowState,
    rows: Vec<RecordRow>,
    error: Option<String>,
    initialized: bool,
}

impl UploadWorkflow {
    pub fn new(client: KintoClient, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            collection: CollectionId::default(),
            loader: FileLoader::new(),
            state: WorkflowState::Idle,
            rows: Vec::new(),
            error: None,
            initialized: false,
        }
    }

    pub fn collection(&self) -> CollectionId {
        self.collection
    }

    /// Rows currently displayed, in server order.
    pub fn rows(&self) -> &[RecordRow] {
        &self.rows
    }

    /// Content of the error region.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn report_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    /// Create the bucket and collections if needed, then load the list.
    pub async fn initialize(&mut self) -> Result<InitReport, WorkflowError> {
        let report = ensure_objects(&self.client, &self.bucket).await?;
        self.initialized = true;
        self.refresh().await?;
        Ok(report)
    }

    /// Change the target collection without touching the list.
    pub fn set_collection(&mut self, collection: CollectionId) {
        self.collection = collection;
    }

    /// Change the target collection and show its records.
    pub async fn select_collection(&mut self, collection: CollectionId) -> Result<(), WorkflowError> {
        self.collection = collection;
        self.refresh().await.map(|_| ())
    }

    /// Select a file on disk. Any earlier selection is dropped.
    pub fn select_file(&mut self, path: impl AsRef<Path>) -> Result<(), WorkflowError> {
        self.loader.select_path(path)?;
        self.mark_selected();
        Ok(())
    }

    /// Select a file that is already in memory, such as an uploaded form field.
    pub fn select_buffered(&mut self, filename: impl Into<String>, content: Bytes) {
        self.select_with(filename, async move { Ok::<_, io::Error>(content) });
    }

    /// Select a file whose content is produced by `read`.
    pub fn select_with<F>(&mut self, filename: impl Into<String>, read: F)
    where
        F: Future<Output = io::Result<Bytes>> + Send + 'static,
    {
        self.loader.select_with(filename, read);
        self.mark_selected();
    }

    fn mark_selected(&mut self) {
        let filename = self.loader.selected().unwrap_or_default().to_string();
        self.state = WorkflowState::FileSelected { filename };
    }

    /// Wait for the selected file to be fully buffered.
    pub async fn wait_until_loaded(&mut self) -> Result<(), WorkflowError> {
        match self.state {
            WorkflowState::FileLoaded(_) => return Ok(()),
            WorkflowState::FileSelected { .. } => debug!(state = %self.state, "waiting for file"),
            _ => return Err(WorkflowError::NotReady),
        }
        match self.loader.wait().await {
            Ok(file) => {
                info!(filename = %file.filename, size = file.size(), "file loaded");
                self.state = WorkflowState::FileLoaded(file);
                Ok(())
            }
            Err(err) => {
                self.state = WorkflowState::Idle;
                Err(err.into())
            }
        }
    }

    /// Submit the loaded file as a new record with the given `type`.
    pub async fn submit(&mut self, kind: &str) -> Result<RecordId, WorkflowError> {
        self.submit_encoded(kind, Encoding::Identity).await
    }

    pub async fn submit_encoded(
        &mut self,
        kind: &str,
        encoding: Encoding,
    ) -> Result<RecordId, WorkflowError> {
        let file = match std::mem::replace(&mut self.state, WorkflowState::Idle) {
            WorkflowState::FileLoaded(file) => file,
            other => {
                self.state = other;
                return Err(WorkflowError::NotReady);
            }
        };
        self.state = WorkflowState::Submitting {
            filename: file.filename.clone(),
        };
        debug!(state = %self.state, collection = %self.collection, "upload started");

        let record = RecordId::generate();
        let result = match build_upload(file, kind, encoding) {
            Ok(upload) => self
                .client
                .create_record_with_attachment(&self.bucket, self.collection, &record, upload)
                .await
                .map_err(WorkflowError::from),
            Err(err) => Err(err),
        };
        self.state = WorkflowState::Idle;

        if let Err(err) = result {
            warn!(%record, collection = %self.collection, error = %err, "submission failed");
            self.error = Some(err.to_string());
            return Err(err);
        }

        info!(%record, collection = %self.collection, "record created");
        self.error = None;
        if let Err(err) = self.refresh().await {
            warn!(%record, error = %err, "record created but refresh failed");
            return Err(WorkflowError::Refresh {
                record,
                source: Box::new(err),
            });
        }
        Ok(record)
    }

    /// Replace the displayed rows with the collection's current records.
    ///
    /// On failure the previous rows stay in place.
    pub async fn refresh(&mut self) -> Result<usize, WorkflowError> {
        if !self.initialized {
            return Err(WorkflowError::NotInitialized);
        }
        let records = self
            .client
            .list_records(&self.bucket, self.collection)
            .await?;
        self.rows = records.iter().map(RecordRow::from).collect();
        info!(collection = %self.collection, count = self.rows.len(), "records refreshed");
        Ok(self.rows.len())
    }

    pub fn page(&self) -> PageView<'_> {
        PageView {
            bucket: &self.bucket,
            collection: self.collection,
            rows: &self.rows,
            error: self.error(),
        }
    }
}

fn build_upload(
    file: LoadedFile,
    kind: &str,
    encoding: Encoding,
) -> Result<AttachmentUpload, WorkflowError> {
    match encoding {
        Encoding::Identity => Ok(AttachmentUpload {
            filename: file.filename,
            content: file.content,
            mimetype: file.mimetype,
            attributes: RecordAttributes::new(kind),
        }),
        Encoding::Gzip => {
            let original = OriginalFile {
                filename: file.filename.clone(),
                hash: sha256_hex(&file.content),
                mimetype: Some(file.mimetype.to_string()),
                size: file.content.len() as u64,
            };
            let compress_err = |source| WorkflowError::Compress {
                filename: file.filename.clone(),
                source,
            };
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&file.content).map_err(compress_err)?;
            let compressed = encoder.finish().map_err(compress_err)?;

            let filename = format!("{}.gz", file.filename);
            Ok(AttachmentUpload {
                mimetype: guess_mimetype(&filename),
                filename,
                content: Bytes::from(compressed),
                attributes: RecordAttributes {
                    kind: kind.to_string(),
                    original: Some(original),
                },
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::kinto_client::BasicAuth;
    use flate2::read::GzDecoder;
    use mockito::{Matcher, Mock, Server};
    use serde_json::json;
    use std::{io::Read, time::Duration};

    const ATTACHMENT_PATH: &str =
        r"^/buckets/fennec-ota/collections/font/records/[0-9a-f-]{36}/attachment$";
    const FONT_RECORDS: &str = "/buckets/fennec-ota/collections/font/records";

    fn workflow(server: &Server) -> UploadWorkflow {
        let client = KintoClient::new(&server.url())
            .unwrap()
            .with_basic_auth(&BasicAuth::new("user", "pass"));
        UploadWorkflow::new(client, "fennec-ota")
    }

    async fn mock_existing_objects(server: &mut Server) -> Vec<Mock> {
        let mut mocks = vec![
            server
                .mock("PUT", "/buckets/fennec-ota")
                .with_status(412)
                .create_async()
                .await,
        ];
        for collection in CollectionId::ALL {
            let path = format!("/buckets/fennec-ota/collections/{collection}");
            mocks.push(
                server
                    .mock("PUT", path.as_str())
                    .with_status(412)
                    .create_async()
                    .await,
            );
        }
        mocks
    }

    async fn mock_list(server: &mut Server, body: serde_json::Value, hits: usize) -> Mock {
        server
            .mock("GET", FONT_RECORDS)
            .with_status(200)
            .with_body(body.to_string())
            .expect(hits)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn initialize_creates_objects_before_listing() {
        let mut server = Server::new_async().await;
        let _objects = mock_existing_objects(&mut server).await;
        let list = mock_list(
            &mut server,
            json!({"data": [{"id": "a", "type": "serif", "attachment": {
                "filename": "a.woff", "location": "https://cdn/a.woff",
                "mimetype": "font/woff", "size": 3, "hash": "h"
            }}]}),
            1,
        )
        .await;

        let mut wf = workflow(&server);
        let report = wf.initialize().await.unwrap();
        assert_eq!(report.collections.len(), 3);
        assert_eq!(wf.rows().len(), 1);
        assert_eq!(wf.rows()[0].filename, "a.woff");
        list.assert_async().await;
    }

    #[tokio::test]
    async fn listing_before_initialization_is_refused() {
        let mut server = Server::new_async().await;
        let list = mock_list(&mut server, json!({"data": []}), 0).await;

        let mut wf = workflow(&server);
        assert!(matches!(
            wf.refresh().await,
            Err(WorkflowError::NotInitialized)
        ));
        list.assert_async().await;
    }

    #[tokio::test]
    async fn submit_requires_a_loaded_file() {
        let mut server = Server::new_async().await;
        let post = server
            .mock("POST", Matcher::Regex(ATTACHMENT_PATH.into()))
            .expect(0)
            .create_async()
            .await;

        let mut wf = workflow(&server);
        assert!(matches!(wf.submit("t").await, Err(WorkflowError::NotReady)));

        wf.select_with("slow.txt", std::future::pending());
        assert!(!matches!(wf.state, WorkflowState::FileLoaded(_)));
        assert!(matches!(wf.submit("t").await, Err(WorkflowError::NotReady)));
        assert!(matches!(wf.state, WorkflowState::FileSelected { .. }));
        post.assert_async().await;
    }

    #[tokio::test]
    async fn failed_submission_shows_error_and_skips_refresh() {
        let mut server = Server::new_async().await;
        let _objects = mock_existing_objects(&mut server).await;
        // Only the refresh done by `initialize`.
        let list = mock_list(&mut server, json!({"data": []}), 1).await;
        let post = server
            .mock("POST", Matcher::Regex(ATTACHMENT_PATH.into()))
            .with_status(400)
            .with_body(r#"{"message": "Invalid record"}"#)
            .expect(1)
            .create_async()
            .await;

        let mut wf = workflow(&server);
        wf.initialize().await.unwrap();
        wf.select_buffered("font.woff", Bytes::from_static(b"woff"));
        wf.wait_until_loaded().await.unwrap();
        assert!(matches!(wf.state, WorkflowState::FileLoaded(_)));

        let err = wf.submit("serif").await.unwrap_err();
        assert!(matches!(err, WorkflowError::Kinto(_)));
        let message = wf.error().unwrap();
        assert!(!message.is_empty());
        assert!(message.contains("Invalid record"));
        assert!(matches!(wf.state, WorkflowState::Idle));

        post.assert_async().await;
        list.assert_async().await;
    }

    #[tokio::test]
    async fn successful_submission_refreshes_exactly_once() {
        let mut server = Server::new_async().await;
        let _objects = mock_existing_objects(&mut server).await;
        let initial = mock_list(&mut server, json!({"data": []}), 1).await;

        let mut wf = workflow(&server);
        wf.report_error("previous failure");
        wf.initialize().await.unwrap();
        assert!(wf.rows().is_empty());
        initial.assert_async().await;
        initial.remove_async().await;

        let post = server
            .mock("POST", Matcher::Regex(ATTACHMENT_PATH.into()))
            .match_header("authorization", "Basic dXNlcjpwYXNz")
            .with_status(201)
            .expect(1)
            .create_async()
            .await;
        let after = mock_list(
            &mut server,
            json!({"data": [{"id": "new", "type": "serif", "attachment": {
                "filename": "font.woff", "location": "https://cdn/font.woff",
                "mimetype": "font/woff", "size": 4, "hash": "h"
            }}]}),
            1,
        )
        .await;

        wf.select_buffered("font.woff", Bytes::from_static(b"woff"));
        wf.wait_until_loaded().await.unwrap();
        wf.submit("serif").await.unwrap();

        assert!(wf.error().is_none());
        assert_eq!(wf.rows().len(), 1);
        assert_eq!(wf.rows()[0].id, "new");
        assert!(matches!(wf.state, WorkflowState::Idle));
        post.assert_async().await;
        after.assert_async().await;
    }

    #[tokio::test]
    async fn failed_refresh_still_reports_created_record() {
        let mut server = Server::new_async().await;
        let _objects = mock_existing_objects(&mut server).await;
        let initial = mock_list(&mut server, json!({"data": []}), 1).await;

        let mut wf = workflow(&server);
        wf.initialize().await.unwrap();
        initial.remove_async().await;

        let post = server
            .mock("POST", Matcher::Regex(ATTACHMENT_PATH.into()))
            .with_status(201)
            .expect(1)
            .create_async()
            .await;
        server
            .mock("GET", FONT_RECORDS)
            .with_status(503)
            .create_async()
            .await;

        wf.select_buffered("font.woff", Bytes::from_static(b"woff"));
        wf.wait_until_loaded().await.unwrap();
        let err = wf.submit("serif").await.unwrap_err();

        let WorkflowError::Refresh { record, source } = &err else {
            panic!("unexpected error: {err}");
        };
        assert!(matches!(**source, WorkflowError::Kinto(_)));
        assert!(err.to_string().contains(&record.to_string()));
        assert!(matches!(wf.state, WorkflowState::Idle));
        post.assert_async().await;
    }

    #[tokio::test]
    async fn only_the_latest_selection_is_submitted() {
        let mut server = Server::new_async().await;
        let _objects = mock_existing_objects(&mut server).await;
        let _list = mock_list(&mut server, json!({"data": []}), 2).await;
        let fresh = server
            .mock("POST", Matcher::Regex(ATTACHMENT_PATH.into()))
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"filename="new.txt""#.into()),
                Matcher::Regex("fresh-content".into()),
            ]))
            .with_status(201)
            .expect(1)
            .create_async()
            .await;

        let mut wf = workflow(&server);
        wf.initialize().await.unwrap();
        wf.select_with("old.txt", async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, io::Error>(Bytes::from_static(b"stale-content"))
        });
        wf.select_buffered("new.txt", Bytes::from_static(b"fresh-content"));
        wf.wait_until_loaded().await.unwrap();
        wf.submit("text").await.unwrap();

        fresh.assert_async().await;
    }

    #[tokio::test]
    async fn gzip_submission_describes_original_file() {
        let mut server = Server::new_async().await;
        let _objects = mock_existing_objects(&mut server).await;
        let _list = mock_list(&mut server, json!({"data": []}), 2).await;
        let post = server
            .mock("POST", Matcher::Regex(ATTACHMENT_PATH.into()))
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"filename="notes.txt.gz""#.into()),
                Matcher::Regex("(?i)content-type: application/x-gzip".into()),
                Matcher::Regex(r#""original":\{"filename":"notes.txt""#.into()),
                Matcher::Regex(r#""size":5"#.into()),
            ]))
            .with_status(201)
            .expect(1)
            .create_async()
            .await;

        let mut wf = workflow(&server);
        wf.initialize().await.unwrap();
        wf.select_buffered("notes.txt", Bytes::from_static(b"hello"));
        wf.wait_until_loaded().await.unwrap();
        wf.submit_encoded("text", Encoding::Gzip).await.unwrap();
        post.assert_async().await;
    }

    #[test]
    fn gzip_upload_round_trips_content() {
        let file = LoadedFile::new("notes.txt", Bytes::from_static(b"hello"));
        let upload = build_upload(file, "text", Encoding::Gzip).unwrap();
        let mut out = String::new();
        GzDecoder::new(&upload.content[..])
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "hello");
        let original = upload.attributes.original.unwrap();
        assert_eq!(original.hash, sha256_hex(b"hello"));
        assert_eq!(original.mimetype.as_deref(), Some("text/plain"));
    }
}

//! Cancellable, single-slot file loading.
//!
//! Selecting a file starts reading it in the background. Selecting another
//! file before the first one finished cancels the earlier read, so at most one
//! read is in flight and a stale read can never replace the newer selection.

use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::{
    future::Future,
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A file whose whole content has been buffered in memory.
#[derive(Clone, Debug)]
pub struct LoadedFile {
    pub filename: String,
    pub content: Bytes,
    pub mimetype: mime::Mime,
}

impl LoadedFile {
    /// Build a loaded file, guessing its content type from the file name.
    pub fn new(filename: impl Into<String>, content: Bytes) -> Self {
        let filename = filename.into();
        let mimetype = guess_mimetype(&filename);
        Self {
            filename,
            content,
            mimetype,
        }
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }
}

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("no file selected")]
    NothingSelected,
    #[error("loading `{filename}` was cancelled")]
    Cancelled { filename: String },
    #[error("failed to read `{filename}`: {source}")]
    Read {
        filename: String,
        #[source]
        source: io::Error,
    },
    #[error("`{}` does not name a file", .0.display())]
    InvalidPath(PathBuf),
    #[error("load task for `{filename}` failed: {message}")]
    Task { filename: String, message: String },
}

#[derive(Debug)]
struct PendingLoad {
    filename: String,
    cancel: CancellationToken,
    handle: JoinHandle<Result<LoadedFile, LoaderError>>,
}

/// Holds the current file selection and its in-flight read.
#[derive(Debug, Default)]
pub struct FileLoader {
    pending: Option<PendingLoad>,
}

impl FileLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select a file on disk and start reading it.
    pub fn select_path(&mut self, path: impl AsRef<Path>) -> Result<(), LoaderError> {
        let path = path.as_ref().to_path_buf();
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_owned)
            .ok_or_else(|| LoaderError::InvalidPath(path.clone()))?;
        self.select_with(filename, async move {
            tokio::fs::read(&path).await.map(Bytes::from)
        });
        Ok(())
    }

    /// Select a file whose content is produced by `read`.
    ///
    /// Any earlier selection is cancelled first.
    pub fn select_with<F>(&mut self, filename: impl Into<String>, read: F)
    where
        F: Future<Output = io::Result<Bytes>> + Send + 'static,
    {
        self.cancel();

        let filename = filename.into();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let name = filename.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => Err(LoaderError::Cancelled { filename: name }),
                result = read => match result {
                    Ok(content) => Ok(LoadedFile::new(name, content)),
                    Err(source) => Err(LoaderError::Read { filename: name, source }),
                },
            }
        });

        self.pending = Some(PendingLoad {
            filename,
            cancel,
            handle,
        });
    }

    /// Drop the current selection, cancelling its read if still running.
    ///
    /// Returns `true` when a read was still in flight.
    pub fn cancel(&mut self) -> bool {
        let Some(pending) = self.pending.take() else {
            return false;
        };
        let running = !pending.handle.is_finished();
        if running {
            debug!(filename = %pending.filename, "cancelling in-flight file read");
        }
        pending.cancel.cancel();
        running
    }

    /// Name of the currently selected file, if any.
    pub fn selected(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.filename.as_str())
    }

    /// Wait for the current selection to be fully buffered and take it.
    pub async fn wait(&mut self) -> Result<LoadedFile, LoaderError> {
        let pending = self.pending.take().ok_or(LoaderError::NothingSelected)?;
        match pending.handle.await {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => Err(LoaderError::Cancelled {
                filename: pending.filename,
            }),
            Err(err) => Err(LoaderError::Task {
                filename: pending.filename,
                message: err.to_string(),
            }),
        }
    }
}

impl Drop for FileLoader {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel.cancel();
        }
    }
}

/// Guess a content type from the file extension.
pub fn guess_mimetype(filename: &str) -> mime::Mime {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("txt") => mime::TEXT_PLAIN,
        Some("csv") => mime::TEXT_CSV,
        Some("css") => mime::TEXT_CSS,
        Some("html") | Some("htm") => mime::TEXT_HTML,
        Some("xml") => mime::TEXT_XML,
        Some("js") => mime::APPLICATION_JAVASCRIPT,
        Some("json") => mime::APPLICATION_JSON,
        Some("pdf") => mime::APPLICATION_PDF,
        Some("png") => mime::IMAGE_PNG,
        Some("jpg") | Some("jpeg") => mime::IMAGE_JPEG,
        Some("gif") => mime::IMAGE_GIF,
        Some("svg") => mime::IMAGE_SVG,
        Some("woff") => mime::FONT_WOFF,
        Some("woff2") => mime::FONT_WOFF2,
        Some("ttf") => parse_or_octet("font/ttf"),
        Some("otf") => parse_or_octet("font/otf"),
        Some("gz") => parse_or_octet("application/x-gzip"),
        Some("zip") => parse_or_octet("application/zip"),
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}

fn parse_or_octet(value: &str) -> mime::Mime {
    value.parse().unwrap_or(mime::APPLICATION_OCTET_STREAM)
}

/// Hex-encoded sha256 of `content`, the same digest the server reports.
pub fn sha256_hex(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn second_selection_wins_over_slow_first_read() {
        let mut loader = FileLoader::new();
        loader.select_with("first.txt", async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, io::Error>(Bytes::from_static(b"stale"))
        });
        loader.select_with("second.txt", async { Ok::<_, io::Error>(Bytes::from_static(b"fresh")) });

        let loaded = loader.wait().await.unwrap();
        assert_eq!(loaded.filename, "second.txt");
        assert_eq!(&loaded.content[..], b"fresh");
        assert!(loader.selected().is_none());
    }

    #[tokio::test]
    async fn new_selection_cancels_a_read_that_never_finishes() {
        let mut loader = FileLoader::new();
        loader.select_with("hung.bin", std::future::pending());
        assert!(loader.pending.as_ref().is_some_and(|p| !p.handle.is_finished()));
        assert_eq!(loader.selected(), Some("hung.bin"));

        loader.select_with("ok.bin", async { Ok::<_, io::Error>(Bytes::from_static(b"ok")) });
        let loaded = loader.wait().await.unwrap();
        assert_eq!(loaded.filename, "ok.bin");
    }

    #[tokio::test]
    async fn cancel_clears_selection() {
        let mut loader = FileLoader::new();
        loader.select_with("hung.bin", std::future::pending());
        assert!(loader.cancel());
        assert!(!loader.cancel());
        assert!(matches!(
            loader.wait().await,
            Err(LoaderError::NothingSelected)
        ));
    }

    #[tokio::test]
    async fn reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hyph_en.dic");
        std::fs::write(&path, b"hyphenation patterns").unwrap();

        let mut loader = FileLoader::new();
        loader.select_path(&path).unwrap();
        let loaded = loader.wait().await.unwrap();
        assert_eq!(loaded.filename, "hyph_en.dic");
        assert_eq!(loaded.size(), 20);
        assert_eq!(loaded.mimetype, mime::APPLICATION_OCTET_STREAM);
    }

    #[tokio::test]
    async fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = FileLoader::new();
        loader.select_path(dir.path().join("absent.txt")).unwrap();
        match loader.wait().await {
            Err(LoaderError::Read { filename, source }) => {
                assert_eq!(filename, "absent.txt");
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("expected read error, got {other:?}"),
        }
    }

    #[test]
    fn path_without_file_name_is_rejected() {
        let mut loader = FileLoader::new();
        assert!(matches!(
            loader.select_path(".."),
            Err(LoaderError::InvalidPath(_))
        ));
    }

    #[test]
    fn sha256_matches_known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn guesses_common_types() {
        assert_eq!(guess_mimetype("a.WOFF2"), mime::FONT_WOFF2);
        assert_eq!(guess_mimetype("notes.txt"), mime::TEXT_PLAIN);
        assert_eq!(guess_mimetype("bundle.gz").essence_str(), "application/x-gzip");
        assert_eq!(guess_mimetype("README"), mime::APPLICATION_OCTET_STREAM);
    }
}

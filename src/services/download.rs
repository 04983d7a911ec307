//! Fetches the attachments of a collection into a local folder.
//!
//! Files whose local sha256 already matches the server's hash are skipped.
//! Gzipped uploads are stored under their original name, decompressed.

use crate::{
    models::{bucket::CollectionId, record::Record},
    services::{
        file_loader::sha256_hex,
        kinto_client::{KintoClient, KintoError},
    },
};
use flate2::read::GzDecoder;
use futures::StreamExt;
use std::{
    io::{self, BufReader},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Kinto(#[from] KintoError),
    #[error("failed to stream `{filename}`: {source}")]
    Stream {
        filename: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to decompress `{filename}`: {source}")]
    Decompress {
        filename: String,
        #[source]
        source: io::Error,
    },
    #[error("decompression task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("refusing to write outside the target folder: `{0}`")]
    UnsafeFilename(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded(PathBuf),
    UpToDate(PathBuf),
}

/// Where an attachment ends up locally and the hash it should have.
struct Target<'a> {
    filename: &'a str,
    hash: &'a str,
    location: &'a str,
    gzipped: bool,
}

impl<'a> Target<'a> {
    fn of(record: &'a Record) -> Option<Self> {
        let attachment = record.attachment.as_ref()?;
        let original = attachment.original.as_ref().or(record.original.as_ref());
        Some(match original {
            Some(original) => Target {
                filename: &original.filename,
                hash: &original.hash,
                location: &attachment.location,
                gzipped: true,
            },
            None => Target {
                filename: &attachment.filename,
                hash: &attachment.hash,
                location: &attachment.location,
                gzipped: false,
            },
        })
    }
}

/// Download every attachment of `collection` into `folder`.
///
/// Records without an attachment are ignored. Returns one outcome per
/// attachment, in server order.
pub async fn download_attachments(
    client: &KintoClient,
    bucket: &str,
    collection: CollectionId,
    folder: &Path,
) -> Result<Vec<DownloadOutcome>, DownloadError> {
    fs::create_dir_all(folder).await?;
    let records = client.list_records(bucket, collection).await?;

    let mut outcomes = Vec::new();
    for record in &records {
        let Some(target) = Target::of(record) else {
            continue;
        };
        outcomes.push(download_one(client, &target, folder).await?);
    }
    Ok(outcomes)
}

async fn download_one(
    client: &KintoClient,
    target: &Target<'_>,
    folder: &Path,
) -> Result<DownloadOutcome, DownloadError> {
    ensure_plain_filename(target.filename)?;
    let destination = folder.join(target.filename);

    match fs::read(&destination).await {
        Ok(existing) if sha256_hex(&existing) == target.hash => {
            debug!(path = %destination.display(), "skipping, up to date");
            return Ok(DownloadOutcome::UpToDate(destination));
        }
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }

    let tmp_path = folder.join(format!("{}.tmp", target.filename));
    let unpacked_path = folder.join(format!("{}.gunzip.tmp", target.filename));
    let result = fetch_into(client, target, &tmp_path, &unpacked_path, &destination).await;
    let _ = fs::remove_file(&tmp_path).await;
    if result.is_err() {
        let _ = fs::remove_file(&unpacked_path).await;
    }
    result?;

    info!(path = %destination.display(), "downloaded attachment");
    Ok(DownloadOutcome::Downloaded(destination))
}

/// Stream the attachment to `tmp_path`, then move the final content into
/// `destination`. Temporary files are left for the caller to clean up.
async fn fetch_into(
    client: &KintoClient,
    target: &Target<'_>,
    tmp_path: &Path,
    unpacked_path: &Path,
    destination: &Path,
) -> Result<(), DownloadError> {
    stream_to(client, target, tmp_path).await?;
    if !target.gzipped {
        fs::rename(tmp_path, destination).await?;
        return Ok(());
    }

    let (compressed, unpacked) = (tmp_path.to_path_buf(), unpacked_path.to_path_buf());
    tokio::task::spawn_blocking(move || gunzip(&compressed, &unpacked))
        .await?
        .map_err(|source| DownloadError::Decompress {
            filename: target.filename.to_string(),
            source,
        })?;
    fs::rename(unpacked_path, destination).await?;
    Ok(())
}

fn gunzip(compressed: &Path, unpacked: &Path) -> io::Result<()> {
    let mut decoder = GzDecoder::new(BufReader::new(std::fs::File::open(compressed)?));
    let mut out = std::fs::File::create(unpacked)?;
    io::copy(&mut decoder, &mut out)?;
    out.sync_all()
}

async fn stream_to(
    client: &KintoClient,
    target: &Target<'_>,
    path: &Path,
) -> Result<(), DownloadError> {
    let resp = client.fetch_attachment(target.location).await?;
    let mut file = File::create(path).await?;
    let mut body = resp.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|source| DownloadError::Stream {
            filename: target.filename.to_string(),
            source,
        })?;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}

/// Server-provided names must stay inside the target folder.
fn ensure_plain_filename(name: &str) -> Result<(), DownloadError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(std::path::Component::Normal(_)), None) => Ok(()),
        _ => Err(DownloadError::UnsafeFilename(name.to_string())),
    }
}

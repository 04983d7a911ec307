//! HTTP handlers for the upload page.
//!
//! - `GET /` shows the form and the records of the selected collection.
//! - `POST /upload` buffers the submitted file, creates the record and shows
//!   the refreshed page (or the error region on failure).

use crate::{
    errors::AppError,
    models::bucket::CollectionId,
    state::AppState,
};
use axum::{
    extract::{Multipart, Query, State},
    response::Html,
};
use bytes::Bytes;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct IndexQuery {
    pub collection: Option<CollectionId>,
}

/// `GET /`: list the records of the selected collection.
pub async fn index(
    State(state): State<AppState>,
    Query(q): Query<IndexQuery>,
) -> Result<Html<String>, AppError> {
    let mut workflow = state.workflow.lock().await;
    let collection = q.collection.unwrap_or(workflow.collection());
    if let Err(err) = workflow.select_collection(collection).await {
        warn!(%collection, error = %err, "failed to list records");
        workflow.report_error(err.to_string());
    }
    Ok(Html(state.templates.render_page(&workflow.page())?))
}

/// Fields of the upload form.
#[derive(Debug, Default)]
struct UploadForm {
    collection: Option<CollectionId>,
    kind: String,
    attachment: Option<(String, Bytes)>,
}

impl UploadForm {
    async fn read(multipart: &mut Multipart) -> Result<Self, AppError> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().map(str::to_owned);
            match name.as_deref() {
                Some("collection") => {
                    let value = field.text().await?;
                    let collection = value
                        .parse::<CollectionId>()
                        .map_err(|err| AppError::bad_request(err.to_string()))?;
                    form.collection = Some(collection);
                }
                Some("type") => form.kind = field.text().await?,
                Some("attachment") => {
                    let filename = field.file_name().map(str::to_owned);
                    let content = field.bytes().await?;
                    // Browsers send an unnamed empty part when no file was chosen.
                    if let Some(filename) = filename.filter(|f| !f.is_empty()) {
                        form.attachment = Some((filename, content));
                    }
                }
                _ => {}
            }
        }
        Ok(form)
    }
}

/// `POST /upload`: create a record from the multipart form.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Html<String>, AppError> {
    let form = UploadForm::read(&mut multipart).await?;

    let mut workflow = state.workflow.lock().await;
    if let Some(collection) = form.collection {
        workflow.set_collection(collection);
    }

    let Some((filename, content)) = form.attachment else {
        workflow.report_error("select a file to upload");
        return Ok(Html(state.templates.render_page(&workflow.page())?));
    };

    workflow.select_buffered(filename, content);
    let result = match workflow.wait_until_loaded().await {
        Ok(()) => workflow.submit(&form.kind).await.map(|_| ()),
        Err(err) => Err(err),
    };
    if let Err(err) = result {
        workflow.report_error(err.to_string());
    }

    Ok(Html(state.templates.render_page(&workflow.page())?))
}

//! Turns records into displayable rows, and rows into HTML (through the
//! `templates/upload.hbs` handlebars template) or text.
//!
//! Nothing here touches workflow state.

use crate::models::{bucket::CollectionId, record::Record};
use chrono::{DateTime, TimeZone, Utc};
use handlebars::Handlebars;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// One line of the records table.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct RecordRow {
    pub id: String,
    pub kind: String,
    pub filename: String,
    pub location: String,
    pub mimetype: String,
    pub size: Option<u64>,
    pub hash: String,
    pub last_modified: Option<DateTime<Utc>>,
}

impl From<&Record> for RecordRow {
    fn from(record: &Record) -> Self {
        let attachment = record.attachment.clone().unwrap_or_default();
        Self {
            id: record.id.clone(),
            kind: record.kind.clone().unwrap_or_default(),
            size: record.attachment.as_ref().map(|a| a.size),
            filename: attachment.filename,
            location: attachment.location,
            mimetype: attachment.mimetype,
            hash: attachment.hash,
            last_modified: record
                .last_modified
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        }
    }
}

/// Everything the upload page shows.
#[derive(Debug)]
pub struct PageView<'a> {
    pub bucket: &'a str,
    pub collection: CollectionId,
    pub rows: &'a [RecordRow],
    pub error: Option<&'a str>,
}

const UPLOAD_PAGE: &str = "upload";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to register template `{name}`: {source}")]
    Register {
        name: &'static str,
        #[source]
        source: Box<handlebars::TemplateError>,
    },
    #[error("failed to render template `{name}`: {source}")]
    Render {
        name: &'static str,
        #[source]
        source: handlebars::RenderError,
    },
}

/// Handlebars templates for the HTML pages. Values are HTML-escaped.
pub struct PageTemplates {
    engine: Handlebars<'static>,
}

impl PageTemplates {
    pub fn new() -> Result<Self, TemplateError> {
        let mut engine = Handlebars::new();
        Self::register_templates(&mut engine)?;
        Ok(Self { engine })
    }

    fn register_templates(engine: &mut Handlebars) -> Result<(), TemplateError> {
        engine
            .register_template_string(UPLOAD_PAGE, include_str!("../../templates/upload.hbs"))
            .map_err(|source| TemplateError::Register {
                name: UPLOAD_PAGE,
                source: Box::new(source),
            })
    }

    /// Render the upload form, the error region and the records table.
    pub fn render_page(&self, view: &PageView<'_>) -> Result<String, TemplateError> {
        let context = PageContext {
            bucket: view.bucket,
            collections: CollectionId::ALL
                .into_iter()
                .map(|collection| CollectionOption {
                    name: collection.as_str(),
                    selected: collection == view.collection,
                })
                .collect(),
            rows: view.rows,
            error: view.error.unwrap_or_default(),
        };
        self.engine
            .render(UPLOAD_PAGE, &context)
            .map_err(|source| TemplateError::Render {
                name: UPLOAD_PAGE,
                source,
            })
    }
}

impl fmt::Debug for PageTemplates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageTemplates").finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct PageContext<'a> {
    bucket: &'a str,
    collections: Vec<CollectionOption>,
    rows: &'a [RecordRow],
    error: &'a str,
}

#[derive(Serialize)]
struct CollectionOption {
    name: &'static str,
    selected: bool,
}

/// Render rows as an aligned plain-text table for the terminal.
pub fn render_text_table(rows: &[RecordRow]) -> String {
    let headers = ["FILENAME", "TYPE", "MIMETYPE", "SIZE", "HASH", "LOCATION"];
    let cells: Vec<[String; 6]> = rows
        .iter()
        .map(|row| {
            [
                row.filename.clone(),
                row.kind.clone(),
                row.mimetype.clone(),
                row.size.map(|s| s.to_string()).unwrap_or_default(),
                row.hash.clone(),
                row.location.clone(),
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for line in &cells {
        for (width, cell) in widths.iter_mut().zip(line) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_text_line(&mut out, &headers.map(String::from), &widths);
    for line in &cells {
        push_text_line(&mut out, line, &widths);
    }
    out
}

fn push_text_line(out: &mut String, cells: &[String; 6], widths: &[usize; 6]) {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, &width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join("  ");
    out.push_str(line.trim_end());
    out.push('\n');
}

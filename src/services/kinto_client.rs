//! HTTP client for the Kinto-style record store.
//!
//! Wraps the handful of REST calls the uploader needs: conditional creation of
//! the bucket and collections, creating a record with a multipart attachment,
//! listing a collection's records and fetching attachment content. Every
//! request carries the same Basic `Authorization` header.

use crate::models::{
    bucket::CollectionId,
    record::{Record, RecordAttributes, RecordId, RecordList},
};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use reqwest::{
    Method, RequestBuilder, Response, StatusCode,
    header::{AUTHORIZATION, IF_NONE_MATCH},
    multipart::{Form, Part},
};
use secrecy::{ExposeSecret, Secret};
use std::fmt;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Primary error type for the [`KintoClient`]
#[derive(Debug, Error)]
pub enum KintoError {
    #[error("invalid server URL: {0}")]
    BaseUrl(#[from] url::ParseError),

    #[error("failed to send {method} {url} request: {source}")]
    RequestSend {
        method: Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("server responded with error [{code}]: {message}")]
    ApiError { code: StatusCode, message: String },

    #[error("failed to parse JSON response: {0}")]
    Json(#[source] reqwest::Error),

    #[error("failed to read the response body: {0}")]
    Body(#[source] reqwest::Error),

    #[error("invalid attachment content type `{mimetype}`: {source}")]
    ContentType {
        mimetype: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to encode record attributes: {0}")]
    Encode(#[from] serde_json::Error),
}

impl KintoError {
    fn request_send(method: Method, url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::RequestSend {
            method,
            url: url.into(),
            source,
        }
    }

    /// The HTTP status returned by the server, if the request got that far.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            KintoError::ApiError { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, KintoError>;

/// Username and password sent as HTTP Basic authentication.
#[derive(Clone)]
pub struct BasicAuth {
    user: String,
    password: Secret<String>,
}

impl BasicAuth {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: Secret::new(password.into()),
        }
    }

    /// Parse `user:pass` credentials. The password may itself contain `:`.
    pub fn parse(credentials: &str) -> Option<Self> {
        let (user, password) = credentials.split_once(':')?;
        Some(Self::new(user, password))
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    fn header_value(&self) -> Secret<String> {
        let raw = format!("{}:{}", self.user, self.password.expose_secret());
        Secret::new(format!("Basic {}", general_purpose::STANDARD.encode(raw)))
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Result of a conditional "create if absent" request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

impl fmt::Display for CreateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreateOutcome::Created => f.write_str("created"),
            CreateOutcome::AlreadyExists => f.write_str("already exists"),
        }
    }
}

/// A fully buffered file ready to be sent as the `attachment` part.
#[derive(Clone, Debug)]
pub struct AttachmentUpload {
    pub filename: String,
    pub content: Bytes,
    pub mimetype: mime::Mime,
    pub attributes: RecordAttributes,
}

/// The record store client.
#[derive(Debug, Clone)]
pub struct KintoClient {
    /// Server root, e.g. `https://kinto.example.com/v1`, without trailing slash
    base_url: String,
    /// Complete `Authorization` header value sent with every request
    authorization: Option<Secret<String>>,
    /// A [`reqwest::Client`] for handling HTTP requests
    http_client: reqwest::Client,
}

impl KintoClient {
    /// Create a new [`KintoClient`] for the server rooted at `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        let parsed = Url::parse(base_url)?;
        Ok(Self {
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            authorization: None,
            http_client: reqwest::Client::new(),
        })
    }

    /// Attach Basic authentication to every request sent by this client.
    pub fn with_basic_auth(mut self, auth: &BasicAuth) -> Self {
        self.authorization = Some(auth.header_value());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn bucket_url(&self, bucket: &str) -> String {
        format!("{}/buckets/{}", self.base_url, bucket)
    }

    pub fn collection_url(&self, bucket: &str, collection: CollectionId) -> String {
        format!("{}/collections/{}", self.bucket_url(bucket), collection)
    }

    pub fn records_url(&self, bucket: &str, collection: CollectionId) -> String {
        format!("{}/records", self.collection_url(bucket, collection))
    }

    pub fn attachment_url(
        &self,
        bucket: &str,
        collection: CollectionId,
        record: &RecordId,
    ) -> String {
        format!(
            "{}/{}/attachment",
            self.records_url(bucket, collection),
            record
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let req = self.http_client.request(method, url);
        match &self.authorization {
            Some(value) => req.header(AUTHORIZATION, value.expose_secret().as_str()),
            None => req,
        }
    }

    async fn send(&self, method: Method, url: &str, req: RequestBuilder) -> Result<Response> {
        debug!(%method, url, "sending request");
        req.send()
            .await
            .map_err(|src| KintoError::request_send(method, url, src))
    }

    /// Make a request to `GET /` to check the server is reachable.
    pub async fn server_info(&self) -> Result<()> {
        let url = format!("{}/", self.base_url);
        let resp = self
            .send(Method::GET, &url, self.request(Method::GET, &url))
            .await?;
        error_for_status(resp).await.map(|_| ())
    }

    /// Make a request to `PUT /buckets/{bid}` guarded by `If-None-Match: *`.
    pub async fn create_bucket(&self, bucket: &str) -> Result<CreateOutcome> {
        self.create_if_absent(&self.bucket_url(bucket)).await
    }

    /// Make a request to `PUT /buckets/{bid}/collections/{cid}` guarded by
    /// `If-None-Match: *`.
    pub async fn create_collection(
        &self,
        bucket: &str,
        collection: CollectionId,
    ) -> Result<CreateOutcome> {
        self.create_if_absent(&self.collection_url(bucket, collection))
            .await
    }

    /// A `412 Precondition Failed` answer means the object is already there.
    async fn create_if_absent(&self, url: &str) -> Result<CreateOutcome> {
        let req = self.request(Method::PUT, url).header(IF_NONE_MATCH, "*");
        let resp = self.send(Method::PUT, url, req).await?;
        match resp.status() {
            StatusCode::PRECONDITION_FAILED => Ok(CreateOutcome::AlreadyExists),
            status if status.is_success() => Ok(CreateOutcome::Created),
            _ => error_for_status(resp).await.map(|_| CreateOutcome::Created),
        }
    }

    /// Make a request to
    /// `POST /buckets/{bid}/collections/{cid}/records/{rid}/attachment`.
    ///
    /// The body is multipart: `attachment` carries the file bytes and
    /// `data` the JSON-encoded record attributes. Any status of 400 or above
    /// is an error.
    pub async fn create_record_with_attachment(
        &self,
        bucket: &str,
        collection: CollectionId,
        record: &RecordId,
        upload: AttachmentUpload,
    ) -> Result<()> {
        let url = self.attachment_url(bucket, collection, record);
        let data = serde_json::to_string(&upload.attributes)?;
        let part = Part::bytes(upload.content.to_vec())
            .file_name(upload.filename)
            .mime_str(upload.mimetype.as_ref())
            .map_err(|source| KintoError::ContentType {
                mimetype: upload.mimetype.to_string(),
                source,
            })?;
        let form = Form::new().part("attachment", part).text("data", data);

        let req = self.request(Method::POST, &url).multipart(form);
        let resp = self.send(Method::POST, &url, req).await?;
        error_for_status(resp).await.map(|_| ())
    }

    /// Make a request to `GET /buckets/{bid}/collections/{cid}/records`.
    ///
    /// Returns the records in server order. Pagination is not followed.
    pub async fn list_records(&self, bucket: &str, collection: CollectionId) -> Result<Vec<Record>> {
        let url = self.records_url(bucket, collection);
        let resp = self
            .send(Method::GET, &url, self.request(Method::GET, &url))
            .await?;
        let list: RecordList = error_for_status(resp)
            .await?
            .json()
            .await
            .map_err(KintoError::Json)?;
        Ok(list.data)
    }

    /// Start downloading attachment content from its `location`.
    ///
    /// The returned response has a successful status; the caller streams the
    /// body.
    pub async fn fetch_attachment(&self, location: &str) -> Result<Response> {
        let resp = self
            .send(Method::GET, location, self.request(Method::GET, location))
            .await?;
        error_for_status(resp).await
    }
}

async fn error_for_status(resp: Response) -> Result<Response> {
    let code = resp.status();
    if code.is_client_error() || code.is_server_error() {
        let message = resp.text().await.map_err(KintoError::Body)?;
        return Err(KintoError::ApiError { code, message });
    }
    Ok(resp)
}

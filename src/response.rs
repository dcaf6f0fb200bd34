//! Canned responses and body helpers.

use crate::chain::Response;
use crate::error::{ResourceError, RuleError};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Common content types.
pub mod media_type {
    pub const TEXT: &str = "text/plain";
    pub const HTML: &str = "text/html";
    pub const XML: &str = "text/xml";
    pub const JSON: &str = "application/json";
    pub const FORM_DATA: &str = "multipart/form-data";
    pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
    pub const RAW_DATA: &str = "application/octet-stream";
}

/// A response descriptor a rule answers with.
///
/// The body is held as [`Bytes`], so a rule allowed to fire several times
/// hands out the same content on every call.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    error: Option<RuleError>,
}

impl MockResponse {
    /// Empty response with the given status. Invalid codes are reported when
    /// the owning rule is registered.
    pub fn new(status: u16) -> Self {
        let (status, error) = match StatusCode::from_u16(status) {
            Ok(status) => (status, None),
            Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, Some(RuleError::InvalidStatus(status))),
        };
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            error,
        }
    }

    /// Empty `200 OK`.
    pub fn ok() -> Self {
        Self::new(200)
    }

    /// `200 OK` with a `text/plain` body.
    pub fn text(body: impl Into<String>) -> Self {
        Self::ok().with_text(body)
    }

    /// `200 OK` with an `application/octet-stream` body.
    pub fn bytes(body: impl Into<Bytes>) -> Self {
        Self::ok().with_bytes(body)
    }

    /// `200 OK` with a serialized JSON body.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::ok().with_json(value)
    }

    /// `200 OK` with a body drained from `reader`.
    pub fn from_reader(reader: impl Read) -> std::io::Result<Self> {
        Self::ok().with_reader(reader, media_type::RAW_DATA)
    }

    pub fn with_text(self, body: impl Into<String>) -> Self {
        self.with_body(body.into(), media_type::TEXT)
    }

    pub fn with_bytes(self, body: impl Into<Bytes>) -> Self {
        self.with_body(body, media_type::RAW_DATA)
    }

    pub fn with_json(self, value: &serde_json::Value) -> Self {
        self.with_body(value.to_string(), media_type::JSON)
    }

    pub fn with_reader(self, mut reader: impl Read, content_type: &str) -> std::io::Result<Self> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(self.with_body(buf, content_type))
    }

    /// Set the body and its content type.
    pub fn with_body(mut self, body: impl Into<Bytes>, content_type: &str) -> Self {
        self.body = body.into();
        self.content_type(content_type)
    }

    pub fn status(mut self, status: u16) -> Self {
        match StatusCode::from_u16(status) {
            Ok(code) => self.status = code,
            Err(_) => self.error = Some(RuleError::InvalidStatus(status)),
        }
        self
    }

    pub fn content_type(self, content_type: &str) -> Self {
        self.insert_header(CONTENT_TYPE.as_str(), content_type, false)
    }

    /// Append a header, keeping existing values.
    pub fn header(self, name: &str, value: &str) -> Self {
        self.insert_header(name, value, true)
    }

    fn insert_header(mut self, name: &str, value: &str, append: bool) -> Self {
        let parsed = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| e.to_string())
            .and_then(|name| {
                HeaderValue::from_str(value)
                    .map(|value| (name, value))
                    .map_err(|e| e.to_string())
            });
        match parsed {
            Ok((name, value)) if append => {
                self.headers.append(name, value);
            }
            Ok((name, value)) => {
                self.headers.insert(name, value);
            }
            Err(message) => {
                self.error = Some(RuleError::InvalidHeader {
                    name: name.to_string(),
                    message,
                });
            }
        }
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Construction error recorded by the fluent setters, if any.
    pub(crate) fn take_error(&mut self) -> Option<RuleError> {
        self.error.take()
    }

    /// Materialize an [`http::Response`], failing on an invalid status or
    /// header recorded by the setters.
    pub fn try_into_response(mut self) -> Result<Response, RuleError> {
        match self.take_error() {
            Some(e) => Err(e),
            None => Ok(self.to_response()),
        }
    }

    /// Materialize an [`http::Response`]. Cheap: the body is reference counted.
    ///
    /// Construction errors are not checked here: an invalid status comes out
    /// as `500` and an invalid header is missing. Use
    /// [`try_into_response`](MockResponse::try_into_response) to surface them.
    pub fn to_response(&self) -> Response {
        let mut response = http::Response::new(self.body.clone());
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

impl Default for MockResponse {
    fn default() -> Self {
        Self::ok()
    }
}

/// Infallible; see [`MockResponse::to_response`] for how construction errors
/// are dropped.
impl From<MockResponse> for Response {
    fn from(mock: MockResponse) -> Self {
        mock.to_response()
    }
}

/// Loads named fixture files from a base directory.
#[derive(Debug, Clone)]
pub struct Resources {
    base: PathBuf,
}

impl Resources {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Resources relative to the crate being built, e.g. `tests/resources`.
    pub fn from_manifest_dir(relative: impl AsRef<Path>) -> Self {
        let root = std::env::var_os("CARGO_MANIFEST_DIR")
            .map(PathBuf::from)
            .unwrap_or_default();
        Self::new(root.join(relative))
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Open a resource for reading.
    pub fn open(&self, name: &str) -> Result<std::fs::File, ResourceError> {
        std::fs::File::open(self.base.join(name)).map_err(|e| self.error(name, e))
    }

    /// Read a resource fully.
    pub fn read(&self, name: &str) -> Result<Bytes, ResourceError> {
        std::fs::read(self.base.join(name))
            .map(Bytes::from)
            .map_err(|e| self.error(name, e))
    }

    /// `200 OK` with the resource as body; the content type follows the
    /// file extension.
    pub fn response(&self, name: &str) -> Result<MockResponse, ResourceError> {
        let body = self.read(name)?;
        Ok(MockResponse::ok().with_body(body, guess_content_type(name)))
    }

    fn error(&self, name: &str, source: std::io::Error) -> ResourceError {
        if source.kind() == std::io::ErrorKind::NotFound {
            ResourceError::NotFound(name.to_string())
        } else {
            ResourceError::Io {
                name: name.to_string(),
                source,
            }
        }
    }
}

/// Content type for a file name, by extension.
pub fn guess_content_type(name: &str) -> &'static str {
    let extension = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("json") => media_type::JSON,
        Some("txt") => media_type::TEXT,
        Some("html") | Some("htm") => media_type::HTML,
        Some("xml") => media_type::XML,
        _ => media_type::RAW_DATA,
    }
}

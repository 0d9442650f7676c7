//! Centralized error types for the drivegate server.
//!
//! [`GatewayError`] carries enough detail for the logs. What the browser sees
//! is decided by [`ErrorKind`], which is the only place statuses are chosen.

use std::{error::Error, net::AddrParseError};

use askama::Template;
use http::{
    HeaderValue, Response, StatusCode,
    header::{CONTENT_TYPE, InvalidHeaderValue},
};
use http_body_util::Full;
use hyper::body::Bytes;
use mime_guess::mime::TEXT_HTML_UTF_8;

use crate::web::templates::ErrorTemplate;

/// Which storage call failed, so the user gets the matching generic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOperation {
    Search,
    Upload,
}

impl std::fmt::Display for StorageOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageOperation::Search => f.write_str("search"),
            StorageOperation::Upload => f.write_str("upload"),
        }
    }
}

#[derive(Debug)]
pub enum GatewayError {
    AccessDenied(String),
    AuthenticationFailed(String),
    Configuration(String),
    EmptyFilename,
    HttpResponseError(String),
    Hyper(String),
    InvalidMultipart(String),
    Io(std::io::Error),
    MissingFile,
    NoAccessibleTabs(String),
    NotAuthenticated,
    NotFound,
    Other(String),
    PayloadTooLarge(u64),
    Rustls(String),
    SerdeJson(serde_json::Error),
    Session(String),
    StateMismatch,
    StateMissing(&'static str),
    /// The storage provider refused the access token
    StorageUnauthorized(StorageOperation),
    TemplateRendering(String),
    Upstream {
        operation: StorageOperation,
        message: String,
    },
}

/// Closed set of outcomes a failed request can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Unauthenticated,
    Forbidden,
    NotFound,
    PayloadTooLarge,
    Upstream,
    Internal,
}

impl ErrorKind {
    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::Upstream | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::AccessDenied(tab) => write!(f, "Access denied to tab '{tab}'"),
            GatewayError::AuthenticationFailed(msg) => {
                write!(f, "Authentication failed: {}", msg)
            }
            GatewayError::Configuration(msg) => write!(f, "Configuration Error: {}", msg),
            GatewayError::EmptyFilename => f.write_str("Uploaded file has an empty filename"),
            GatewayError::HttpResponseError(msg) => write!(f, "HTTP Response Error: {}", msg),
            GatewayError::Hyper(msg) => write!(f, "Hyper HTTP Error: {}", msg),
            GatewayError::InvalidMultipart(msg) => write!(f, "Invalid multipart body: {}", msg),
            GatewayError::Io(e) => write!(f, "IO Error: {:?}", e),
            GatewayError::MissingFile => f.write_str("Multipart body has no 'file' field"),
            GatewayError::NoAccessibleTabs(email) => {
                write!(f, "User '{email}' has no accessible tabs")
            }
            GatewayError::NotAuthenticated => f.write_str("Not authenticated"),
            GatewayError::NotFound => f.write_str("Not Found"),
            GatewayError::Other(msg) => write!(f, "Error: {}", msg),
            GatewayError::PayloadTooLarge(limit) => {
                write!(f, "Upload exceeds the limit of {limit} bytes")
            }
            GatewayError::Rustls(msg) => write!(f, "Rustls Error: {}", msg),
            GatewayError::SerdeJson(e) => write!(f, "Serde-JSON Error: {}", e),
            GatewayError::Session(msg) => write!(f, "Session Error: {}", msg),
            GatewayError::StateMismatch => {
                f.write_str("State mismatch between session and request")
            }
            GatewayError::StateMissing(location) => {
                write!(f, "State parameter missing from {location}")
            }
            GatewayError::StorageUnauthorized(operation) => {
                write!(f, "Storage {operation} refused the access token")
            }
            GatewayError::TemplateRendering(msg) => write!(f, "Template Rendering Error: {}", msg),
            GatewayError::Upstream { operation, message } => {
                write!(f, "Storage {operation} failed: {message}")
            }
        }
    }
}

impl GatewayError {
    pub fn upstream(operation: StorageOperation, error: &impl ToString) -> Self {
        GatewayError::Upstream {
            operation,
            message: error.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::EmptyFilename
            | GatewayError::InvalidMultipart(_)
            | GatewayError::MissingFile
            | GatewayError::StateMismatch
            | GatewayError::StateMissing(_) => ErrorKind::BadRequest,
            GatewayError::AuthenticationFailed(_) | GatewayError::NotAuthenticated => {
                ErrorKind::Unauthenticated
            }
            GatewayError::AccessDenied(_) | GatewayError::NoAccessibleTabs(_) => {
                ErrorKind::Forbidden
            }
            GatewayError::NotFound => ErrorKind::NotFound,
            GatewayError::PayloadTooLarge(_) => ErrorKind::PayloadTooLarge,
            GatewayError::Upstream { .. } | GatewayError::StorageUnauthorized(_) => {
                ErrorKind::Upstream
            }
            GatewayError::Configuration(_)
            | GatewayError::HttpResponseError(_)
            | GatewayError::Hyper(_)
            | GatewayError::Io(_)
            | GatewayError::Other(_)
            | GatewayError::Rustls(_)
            | GatewayError::SerdeJson(_)
            | GatewayError::Session(_)
            | GatewayError::TemplateRendering(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.kind().status_code()
    }

    /// The message shown to the browser. Never includes upstream or internal detail.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::EmptyFilename => "No file selected".to_string(),
            GatewayError::MissingFile => "No file provided".to_string(),
            GatewayError::InvalidMultipart(_) => "Invalid upload request".to_string(),
            GatewayError::StateMismatch | GatewayError::StateMissing(_) => {
                format!("Bad Request: {self}")
            }
            GatewayError::AuthenticationFailed(_) => {
                crate::constants::AUTH_FAILED_MESSAGE.to_string()
            }
            GatewayError::NotAuthenticated => "Not authenticated".to_string(),
            GatewayError::NoAccessibleTabs(_) => {
                "Access denied. Contact administrator.".to_string()
            }
            GatewayError::AccessDenied(_) => "Access denied".to_string(),
            GatewayError::NotFound => "Endpoint not found".to_string(),
            GatewayError::PayloadTooLarge(_) => "Upload too large".to_string(),
            GatewayError::Upstream {
                operation: StorageOperation::Search,
                ..
            }
            | GatewayError::StorageUnauthorized(StorageOperation::Search) => "Failed to load files. Please try again.".to_string(),
            GatewayError::Upstream {
                operation: StorageOperation::Upload,
                ..
            }
            | GatewayError::StorageUnauthorized(StorageOperation::Upload) => "Upload failed. Please try again.".to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

impl Error for GatewayError {}

impl From<InvalidHeaderValue> for GatewayError {
    fn from(err: InvalidHeaderValue) -> Self {
        GatewayError::Other(err.to_string())
    }
}

impl From<askama::Error> for GatewayError {
    fn from(err: askama::Error) -> Self {
        GatewayError::TemplateRendering(err.to_string())
    }
}

impl From<tower_sessions::session::Error> for GatewayError {
    fn from(err: tower_sessions::session::Error) -> Self {
        GatewayError::Session(err.to_string())
    }
}

impl From<multer::Error> for GatewayError {
    fn from(err: multer::Error) -> Self {
        GatewayError::InvalidMultipart(err.to_string())
    }
}

impl From<hyper::Error> for GatewayError {
    fn from(err: hyper::Error) -> Self {
        GatewayError::Hyper(err.to_string())
    }
}

impl From<http::Error> for GatewayError {
    fn from(err: http::Error) -> Self {
        GatewayError::HttpResponseError(err.to_string())
    }
}

impl From<rustls::Error> for GatewayError {
    fn from(err: rustls::Error) -> Self {
        GatewayError::Rustls(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::SerdeJson(err)
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Io(err)
    }
}

impl From<AddrParseError> for GatewayError {
    fn from(err: AddrParseError) -> Self {
        GatewayError::Configuration(err.to_string())
    }
}

/// Renders the HTML error page, for browser-facing routes.
impl From<GatewayError> for Response<Full<Bytes>> {
    fn from(err: GatewayError) -> Response<Full<Bytes>> {
        let template = ErrorTemplate {
            error_message: err.public_message(),
        };

        let html = match template.render() {
            Ok(html) => html,
            Err(e) => format!(
                "<html><body><h1>Error</h1><p>Failed to render error template: {}</p><p>{}</p></body></html>",
                e,
                err.public_message()
            ),
        };

        let mut res = Response::new(Full::new(Bytes::from(html)));

        *res.status_mut() = err.status_code();
        (*res.headers_mut()).append(
            CONTENT_TYPE,
            HeaderValue::from_static(TEXT_HTML_UTF_8.as_ref()),
        );
        res
    }
}

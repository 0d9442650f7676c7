//! Google Drive storage provider.
//!
//! Uses the generated `google-drive3` client. Each call builds a hub around
//! the shared HTTP client and the signed-in user's access token, so requests
//! run with the user's own Drive permissions.

use async_trait::async_trait;
use google_drive3 as drive3;
use tracing::{debug, error, instrument};

use crate::auth::DriveCredentials;
use crate::constants::{SEARCH_FIELDS, SEARCH_PAGE_SIZE, UPLOAD_FIELDS};
use crate::error::{GatewayError, StorageOperation};
use crate::storage::{FileRecord, StorageProvider, UploadRequest, UploadedFile};

type DriveConnector = drive3::hyper_rustls::HttpsConnector<
    drive3::hyper_util::client::legacy::connect::HttpConnector,
>;

pub struct DriveStorage {
    client: drive3::common::Client<DriveConnector>,
}

impl DriveStorage {
    pub fn new() -> Result<Self, GatewayError> {
        let connector = drive3::hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|err| {
                GatewayError::Configuration(format!("Failed to load native root certs: {err}"))
            })?
            .https_only()
            .enable_http1()
            .build();

        let client = drive3::hyper_util::client::legacy::Client::builder(
            drive3::hyper_util::rt::TokioExecutor::new(),
        )
        .build(connector);

        Ok(Self { client })
    }

    fn hub(&self, credentials: &DriveCredentials) -> drive3::DriveHub<DriveConnector> {
        drive3::DriveHub::new(
            self.client.clone(),
            credentials.access_token.value().to_string(),
        )
    }
}

/// Quote a value for use inside a Drive query string literal
fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Builds the Drive `q` parameter: never folders or trashed files, optionally
/// limited to a parent folder and a full-text term.
pub(crate) fn build_search_query(folder_id: Option<&str>, term: Option<&str>) -> String {
    let mut query =
        "mimeType != 'application/vnd.google-apps.folder' and trashed = false".to_string();
    if let Some(folder_id) = folder_id.filter(|f| !f.is_empty()) {
        query.push_str(&format!(" and '{}' in parents", escape_query_value(folder_id)));
    }
    if let Some(term) = term.map(str::trim).filter(|t| !t.is_empty()) {
        query.push_str(&format!(" and fullText contains '{}'", escape_query_value(term)));
    }
    query
}

/// Drive answers an expired or revoked token with a 401, usually as a JSON error body
fn is_unauthorized(err: &drive3::Error) -> bool {
    match err {
        drive3::Error::BadRequest(body) => {
            body.pointer("/error/code").and_then(|code| code.as_u64()) == Some(401)
        }
        drive3::Error::Failure(response) => response.status() == http::StatusCode::UNAUTHORIZED,
        drive3::Error::MissingToken(_) => true,
        _ => false,
    }
}

fn storage_error(operation: StorageOperation, err: drive3::Error) -> GatewayError {
    if is_unauthorized(&err) {
        debug!(error = %err, "Drive refused the access token");
        return GatewayError::StorageUnauthorized(operation);
    }
    error!(error = %err, "Drive {operation} failed");
    GatewayError::upstream(operation, &err)
}

impl From<drive3::api::File> for FileRecord {
    fn from(file: drive3::api::File) -> Self {
        Self {
            id: file.id.unwrap_or_default(),
            name: file.name.unwrap_or_default(),
            mime_type: file.mime_type,
            web_view_link: file.web_view_link,
            created_time: file.created_time,
        }
    }
}

#[async_trait]
impl StorageProvider for DriveStorage {
    #[instrument(level = "debug", skip(self, credentials))]
    async fn search(
        &self,
        credentials: &DriveCredentials,
        folder_id: Option<&str>,
        term: Option<&str>,
    ) -> Result<Vec<FileRecord>, GatewayError> {
        let query = build_search_query(folder_id, term);
        debug!(query = %query, "Searching Drive");

        let (_resp, list) = self
            .hub(credentials)
            .files()
            .list()
            .q(&query)
            .page_size(SEARCH_PAGE_SIZE)
            .order_by("createdTime desc")
            .supports_all_drives(true)
            .include_items_from_all_drives(true)
            .param("fields", SEARCH_FIELDS)
            .doit()
            .await
            .map_err(|err| storage_error(StorageOperation::Search, err))?;

        Ok(list
            .files
            .unwrap_or_default()
            .into_iter()
            .map(FileRecord::from)
            .collect())
    }

    #[instrument(level = "debug", skip(self, credentials, request), fields(name = %request.name))]
    async fn upload(
        &self,
        credentials: &DriveCredentials,
        request: UploadRequest,
    ) -> Result<UploadedFile, GatewayError> {
        let metadata = drive3::api::File {
            name: Some(request.name.clone()),
            parents: request.folder_id.map(|folder_id| vec![folder_id]),
            ..Default::default()
        };

        let (_resp, created) = self
            .hub(credentials)
            .files()
            .create(metadata)
            .supports_all_drives(true)
            .param("fields", UPLOAD_FIELDS)
            .upload_resumable(request.body, request.mime_type)
            .await
            .map_err(|err| storage_error(StorageOperation::Upload, err))?;

        match created.id {
            Some(id) => Ok(UploadedFile {
                web_view_link: created.web_view_link.unwrap_or_default(),
                id,
            }),
            None => Err(GatewayError::upstream(
                StorageOperation::Upload,
                &"Drive returned no file id",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_unscoped_without_term() {
        assert_eq!(
            build_search_query(None, None),
            "mimeType != 'application/vnd.google-apps.folder' and trashed = false"
        );
        assert_eq!(build_search_query(Some(""), Some("   ")), build_search_query(None, None));
    }

    #[test]
    fn test_query_scoped_with_term() {
        let query = build_search_query(Some("folder-123"), Some(" budget "));
        assert!(query.ends_with(" and 'folder-123' in parents and fullText contains 'budget'"));
    }

    #[test]
    fn test_query_escapes_quotes_and_backslashes() {
        let query = build_search_query(None, Some(r"o'brien\notes"));
        assert!(query.ends_with(r" and fullText contains 'o\'brien\\notes'"));
    }

    #[test]
    fn test_unauthorized_detection() {
        let expired = drive3::Error::BadRequest(serde_json::json!({
            "error": {"code": 401, "message": "Request had invalid authentication credentials."}
        }));
        assert!(is_unauthorized(&expired));
        assert!(matches!(
            storage_error(StorageOperation::Search, expired),
            GatewayError::StorageUnauthorized(StorageOperation::Search)
        ));

        let forbidden = drive3::Error::BadRequest(serde_json::json!({
            "error": {"code": 403, "message": "The user does not have sufficient permissions"}
        }));
        assert!(!is_unauthorized(&forbidden));
        assert!(matches!(
            storage_error(StorageOperation::Upload, forbidden),
            GatewayError::Upstream {
                operation: StorageOperation::Upload,
                ..
            }
        ));
        assert!(!is_unauthorized(&drive3::Error::Cancelled));
    }

    #[test]
    fn test_file_record_from_drive_file() {
        let record = FileRecord::from(drive3::api::File {
            id: Some("abc".to_string()),
            name: Some("minutes.pdf".to_string()),
            mime_type: Some("application/pdf".to_string()),
            web_view_link: Some("https://drive.google.com/file/d/abc/view".to_string()),
            ..Default::default()
        });
        assert_eq!(record.id, "abc");
        assert_eq!(record.name, "minutes.pdf");
        assert_eq!(record.created_time, None);
        let json = serde_json::to_value(&record).expect("Failed to serialize record");
        assert_eq!(json["mimeType"], "application/pdf");
        assert!(json.get("createdTime").is_none());
    }
}

use std::collections::BTreeMap;

use serde::Serialize;

use crate::storage::FileRecord;

/// `GET /api/user`
#[derive(Serialize, Debug)]
#[serde(untagged)]
pub(crate) enum UserResponse {
    Anonymous {
        authenticated: bool,
    },
    Authenticated {
        authenticated: bool,
        email: String,
        accessible_tabs: Vec<String>,
        folder_map: BTreeMap<String, String>,
    },
}

impl UserResponse {
    pub(crate) fn anonymous() -> Self {
        UserResponse::Anonymous {
            authenticated: false,
        }
    }
}

#[derive(Serialize, Debug)]
pub(crate) struct FilesResponse {
    pub(crate) files: Vec<FileRecord>,
}

#[derive(Serialize, Debug)]
pub(crate) struct UploadResponse {
    pub(crate) success: bool,
    pub(crate) file: UploadedFileInfo,
}

#[derive(Serialize, Debug)]
pub(crate) struct UploadedFileInfo {
    pub(crate) name: String,
    #[serde(rename = "webViewLink")]
    pub(crate) web_view_link: String,
    pub(crate) id: String,
}

/// `{"error": "..."}` body for every failed API call
#[derive(Serialize, Debug)]
pub(crate) struct ErrorBody {
    pub(crate) error: String,
}

#[derive(Debug, Default)]
pub(crate) struct DemoLoginForm {
    pub(crate) email: String,
}

impl DemoLoginForm {
    /// Parse an `application/x-www-form-urlencoded` body, trimming the email
    pub(crate) fn parse(body: &[u8]) -> Self {
        let email = form_urlencoded::parse(body)
            .find(|(key, _)| key == "email")
            .map(|(_, value)| value.trim().to_string())
            .unwrap_or_default();
        Self { email }
    }
}

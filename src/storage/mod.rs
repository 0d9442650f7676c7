//! Storage gateway
//!
//! Search and upload against the remote storage provider, scoped to a folder.

use std::fs::File;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mime_guess::Mime;
use serde::Serialize;

use crate::auth::DriveCredentials;
use crate::error::GatewayError;

pub mod drive;

pub use drive::DriveStorage;

/// File metadata as returned to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_view_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct UploadRequest {
    pub name: String,
    pub mime_type: Mime,
    pub folder_id: Option<String>,
    /// Handle onto the spooled upload, positioned at the start
    pub body: File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub id: String,
    pub web_view_link: String,
}

#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Newest-first page of files in `folder_id` (or anywhere when `None`),
    /// optionally filtered by a full-text term
    async fn search(
        &self,
        credentials: &DriveCredentials,
        folder_id: Option<&str>,
        term: Option<&str>,
    ) -> Result<Vec<FileRecord>, GatewayError>;

    async fn upload(
        &self,
        credentials: &DriveCredentials,
        request: UploadRequest,
    ) -> Result<UploadedFile, GatewayError>;
}

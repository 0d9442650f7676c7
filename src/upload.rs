//! Spooling of multipart uploads to a temporary file.
//!
//! The `file` field of a `multipart/form-data` body is streamed to a
//! [`NamedTempFile`], which is removed when the [`BufferedUpload`] is dropped,
//! whichever way the request ends.

use std::path::Path;

use hyper::body::Bytes;
use mime_guess::Mime;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use crate::error::GatewayError;

const FILE_FIELD: &str = "file";

/// An uploaded file spooled to disk
#[derive(Debug)]
pub struct BufferedUpload {
    file: NamedTempFile,
    file_name: String,
    mime_type: Mime,
    size: u64,
}

/// Extract the boundary from a `multipart/form-data` content type
pub fn extract_boundary(content_type: &str) -> Option<String> {
    multer::parse_boundary(content_type).ok()
}

/// Reduce a client-supplied filename to its last path component
pub(crate) fn sanitize_filename(name: &str) -> Option<String> {
    let basename = name
        .trim()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim();
    if basename.is_empty() || basename == "." || basename == ".." {
        return None;
    }
    Some(basename.to_string())
}

impl BufferedUpload {
    /// Read a multipart body, spooling the `file` field and draining everything else.
    ///
    /// Fails with [`GatewayError::EmptyFilename`] as soon as the `file` part's
    /// headers are seen, before any of its content is written.
    #[instrument(level = "debug", skip(stream, boundary))]
    pub async fn from_multipart<S, O, E>(
        stream: S,
        boundary: String,
        spool_dir: &Path,
        max_bytes: u64,
    ) -> Result<Self, GatewayError>
    where
        S: futures_util::Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    {
        let mut multipart = multer::Multipart::new(stream, boundary);
        let mut upload: Option<BufferedUpload> = None;

        while let Some(mut field) = multipart.next_field().await? {
            if field.name() != Some(FILE_FIELD) || upload.is_some() {
                while field.chunk().await?.is_some() {}
                continue;
            }

            let file_name = field
                .file_name()
                .and_then(sanitize_filename)
                .ok_or(GatewayError::EmptyFilename)?;
            let mime_type = field
                .content_type()
                .cloned()
                .unwrap_or_else(|| mime_guess::from_path(&file_name).first_or_octet_stream());

            let file = NamedTempFile::new_in(spool_dir)?;
            let mut writer = tokio::fs::File::from_std(file.reopen()?);
            let mut size: u64 = 0;
            while let Some(chunk) = field.chunk().await? {
                size = size.saturating_add(chunk.len() as u64);
                if size > max_bytes {
                    return Err(GatewayError::PayloadTooLarge(max_bytes));
                }
                writer.write_all(&chunk).await?;
            }
            writer.flush().await?;

            debug!(file_name = %file_name, size, path = ?file.path(), "Spooled upload to disk");
            upload = Some(BufferedUpload {
                file,
                file_name,
                mime_type,
                size,
            });
        }

        upload.ok_or(GatewayError::MissingFile)
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn mime_type(&self) -> &Mime {
        &self.mime_type
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// A fresh read handle positioned at the start of the spooled content
    pub fn reopen(&self) -> Result<std::fs::File, GatewayError> {
        Ok(self.file.reopen()?)
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::io::Read;

    use super::*;

    const BOUNDARY: &str = "----drivegate-test";

    fn body_stream(
        body: String,
    ) -> impl futures_util::Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        futures_util::stream::once(async move { Ok::<_, Infallible>(Bytes::from(body)) })
    }

    async fn buffer(body: String, max_bytes: u64) -> Result<BufferedUpload, GatewayError> {
        BufferedUpload::from_multipart(
            body_stream(body),
            BOUNDARY.to_string(),
            &std::env::temp_dir(),
            max_bytes,
        )
        .await
    }

    fn part(
        name: &str,
        filename: Option<&str>,
        content_type: Option<&str>,
        content: &str,
    ) -> String {
        let mut part = format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"");
        if let Some(filename) = filename {
            part.push_str(&format!("; filename=\"{filename}\""));
        }
        part.push_str("\r\n");
        if let Some(content_type) = content_type {
            part.push_str(&format!("Content-Type: {content_type}\r\n"));
        }
        part.push_str(&format!("\r\n{content}\r\n"));
        part
    }

    fn body(parts: &[String]) -> String {
        format!("{}--{BOUNDARY}--\r\n", parts.concat())
    }

    #[test]
    fn test_extract_boundary() {
        assert_eq!(
            extract_boundary("multipart/form-data; boundary=----abc123").as_deref(),
            Some("----abc123")
        );
        assert!(extract_boundary("application/json").is_none());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report.pdf").as_deref(), Some("report.pdf"));
        assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_filename(r"C:\Users\me\notes.txt").as_deref(), Some("notes.txt"));
        assert_eq!(sanitize_filename(""), None);
        assert_eq!(sanitize_filename("   "), None);
        assert_eq!(sanitize_filename("dir/"), None);
        assert_eq!(sanitize_filename(".."), None);
    }

    #[tokio::test]
    async fn test_spools_file_and_removes_on_drop() {
        let body = body(&[
            part("note", None, None, "ignored"),
            part("file", Some("minutes.txt"), Some("text/plain"), "hello drive"),
        ]);
        let upload = buffer(body, 1024)
            .await
            .expect("Failed to buffer upload");

        assert_eq!(upload.file_name(), "minutes.txt");
        assert_eq!(upload.mime_type().essence_str(), "text/plain");
        assert_eq!(upload.size(), 11);

        let mut content = String::new();
        upload
            .reopen()
            .expect("Failed to reopen spool")
            .read_to_string(&mut content)
            .expect("Failed to read spool");
        assert_eq!(content, "hello drive");

        let path = upload.path().to_path_buf();
        assert!(path.exists());
        drop(upload);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_guesses_mime_from_filename() {
        let body = body(&[part("file", Some("scan.pdf"), None, "%PDF")]);
        let upload = buffer(body, 1024)
            .await
            .expect("Failed to buffer upload");
        assert_eq!(upload.mime_type().essence_str(), "application/pdf");
    }

    #[tokio::test]
    async fn test_missing_file_field() {
        let body = body(&[part("other", None, None, "value")]);
        let err = buffer(body, 1024)
            .await
            .expect_err("Should fail without a file field");
        assert!(matches!(err, GatewayError::MissingFile));
    }

    #[tokio::test]
    async fn test_empty_filename() {
        let body = body(&[part("file", Some(""), Some("text/plain"), "data")]);
        let err = buffer(body, 1024)
            .await
            .expect_err("Should fail with empty filename");
        assert!(matches!(err, GatewayError::EmptyFilename));
    }

    #[tokio::test]
    async fn test_size_limit() {
        let body = body(&[part("file", Some("big.bin"), None, &"x".repeat(64))]);
        let err = buffer(body, 16)
            .await
            .expect_err("Should fail over the limit");
        assert!(matches!(err, GatewayError::PayloadTooLarge(16)));
    }
}

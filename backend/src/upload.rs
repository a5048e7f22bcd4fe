use actix_multipart::{Field, Multipart, MultipartError};
use actix_web::HttpRequest;
use actix_web::http::header::CONTENT_TYPE;
use actix_web::web::{Bytes, BytesMut};
use futures::TryStreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::config::UploadConfig;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("No file uploaded")]
    NoFile,
    #[error("Payload content length greater than maximum allowed: {limit}")]
    PayloadTooLarge { limit: usize },
    #[error("Only image files are allowed (got {mime:?})")]
    InvalidFileType { mime: Option<String> },
    #[error("Unexpected field: {field:?}")]
    UnexpectedFile { field: Option<String> },
    #[error("Malformed multipart request: {0}")]
    Malformed(#[from] MultipartError),
    #[error("Failed to spool upload: {0}")]
    Spool(#[from] std::io::Error),
}

/// An accepted upload. Dropping it releases the buffer and deletes any spool file.
///
/// The pipeline always reads `bytes`. The spool file is an on-disk copy for
/// inspection while the request is in flight and is never read back.
#[derive(Debug)]
pub struct UploadedImage {
    pub bytes: Bytes,
    pub mime_type: String,
    pub extension: Option<String>,
    spool: Option<NamedTempFile>,
}

impl UploadedImage {
    pub fn spool_path(&self) -> Option<&Path> {
        self.spool.as_ref().map(|f| f.path())
    }
}

#[derive(Debug, Clone)]
pub struct UploadGate {
    field_name: String,
    max_bytes: usize,
    dir: Option<PathBuf>,
}

impl UploadGate {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            field_name: config.field_name.clone(),
            max_bytes: config.max_bytes,
            dir: config.dir.clone(),
        }
    }

    /// Pulls the image part out of a multipart request.
    ///
    /// Checks run in order: a file part named after the configured field must
    /// exist, it must fit in `max_bytes`, and its declared type must be `image/*`.
    /// Only one file part is allowed per request. Text parts are skipped but
    /// still held to `max_bytes`.
    pub async fn accept(
        &self,
        req: &HttpRequest,
        mut payload: Multipart,
    ) -> Result<UploadedImage, UploadError> {
        if !is_multipart(req) {
            return Err(UploadError::NoFile);
        }

        let mut accepted = None;
        while let Some(mut field) = payload.try_next().await? {
            if !is_file(&field) {
                self.read_limited(&mut field).await?;
                continue;
            }
            if accepted.is_some() || field.name() != Some(self.field_name.as_str()) {
                return Err(UploadError::UnexpectedFile {
                    field: field.name().map(str::to_owned),
                });
            }

            let extension = field
                .content_disposition()
                .and_then(|cd| cd.get_filename())
                .and_then(file_extension);
            let mime_type = field.content_type().map(|m| m.essence_str().to_string());

            let bytes = self.read_limited(&mut field).await?;

            let mime_type = match mime_type {
                Some(mime) if mime.starts_with("image/") => mime,
                mime => return Err(UploadError::InvalidFileType { mime }),
            };
            accepted = Some((bytes, mime_type, extension));
        }

        let (bytes, mime_type, extension) = accepted.ok_or(UploadError::NoFile)?;
        let spool = match &self.dir {
            Some(dir) => Some(spool(dir, &bytes, extension.as_deref())?),
            None => None,
        };

        Ok(UploadedImage {
            bytes,
            mime_type,
            extension,
            spool,
        })
    }

    async fn read_limited(&self, field: &mut Field) -> Result<Bytes, UploadError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = field.try_next().await? {
            if buf.len() + chunk.len() > self.max_bytes {
                return Err(UploadError::PayloadTooLarge {
                    limit: self.max_bytes,
                });
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

fn is_multipart(req: &HttpRequest) -> bool {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.trim_start().to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false)
}

fn is_file(field: &Field) -> bool {
    field
        .content_disposition()
        .and_then(|cd| cd.get_filename())
        .is_some()
}

fn file_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
}

/// Writes the upload to `<dir>/<unix-millis>-<random>.<ext>`.
fn spool(dir: &Path, bytes: &[u8], extension: Option<&str>) -> std::io::Result<NamedTempFile> {
    let prefix = format!("{}-", chrono::Utc::now().timestamp_millis());
    let suffix = extension.map(|e| format!(".{}", e)).unwrap_or_default();
    let mut file = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(&suffix)
        .tempfile_in(dir)?;
    file.write_all(bytes)?;
    file.flush()?;
    log::debug!("Spooled {} bytes to {}", bytes.len(), file.path().display());
    Ok(file)
}

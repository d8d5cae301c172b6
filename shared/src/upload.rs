use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Image formats accepted for analysis, checked against the file's magic bytes.
const ALLOWED_FORMATS: &[ImageFormat] = &[
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::WebP,
    ImageFormat::Gif,
];

const MULTIPART_FIELD: &str = "file";
const MAX_FILENAME_LENGTH: usize = 255;

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum UploadError {
    #[error("not an image file: declared {declared_mime:?}, {reason}")]
    InvalidFileType {
        declared_mime: String,
        reason: String,
    },

    #[error("image too large: {size} bytes, max {max}")]
    FileTooLarge { size: usize, max: usize },
}

/// Identifies one accepted file. A result carrying an older token is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UploadToken(pub u64);

impl fmt::Display for UploadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upload-{}", self.0)
    }
}

/// A file picked by the user, as delivered by the shell.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedFile {
    pub name: String,
    pub mime_type: String,
    #[serde(with = "serde_bytes")]
    pub bytes: Vec<u8>,
    /// Shell-side object URL for the chat bubble, if the platform has one.
    pub object_url: Option<String>,
}

// File contents stay out of logs.
impl fmt::Debug for SelectedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectedFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("size_bytes", &self.bytes.len())
            .field("object_url_present", &self.object_url.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "remote_url", rename_all = "snake_case")]
pub enum UploadStatus {
    /// Accepted while a prediction was running; upload starts once it resolves.
    Queued,
    Uploading,
    Uploaded(String),
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    token: UploadToken,
    file: SelectedFile,
    format: ImageFormat,
    preview_data_uri: String,
    status: UploadStatus,
}

impl PendingFile {
    pub fn token(&self) -> UploadToken {
        self.token
    }

    pub fn name(&self) -> &str {
        &self.file.name
    }

    pub fn mime_type(&self) -> &'static str {
        mime_for(self.format)
    }

    pub fn preview_data_uri(&self) -> &str {
        &self.preview_data_uri
    }

    /// What the chat bubble shows: the shell's object URL, else the preview.
    pub fn display_url(&self) -> &str {
        self.file
            .object_url
            .as_deref()
            .unwrap_or(&self.preview_data_uri)
    }

    pub fn status(&self) -> &UploadStatus {
        &self.status
    }

    pub fn remote_url(&self) -> Option<&str> {
        match &self.status {
            UploadStatus::Uploaded(url) => Some(url),
            _ => None,
        }
    }
}

/// Everything the transport needs for `POST {upload}/upload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub token: UploadToken,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// How a transport result relates to the current file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Applied,
    Stale,
}

#[derive(Debug, Clone, Default)]
pub struct UploadPipeline {
    last_token: u64,
    current: Option<PendingFile>,
}

impl UploadPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&PendingFile> {
        self.current.as_ref()
    }

    pub fn current_token(&self) -> Option<UploadToken> {
        self.current.as_ref().map(PendingFile::token)
    }

    /// Remote URL of the current file once its upload has succeeded.
    pub fn remote_url(&self) -> Option<&str> {
        self.current.as_ref().and_then(PendingFile::remote_url)
    }

    pub fn has_queued(&self) -> bool {
        matches!(
            self.current.as_ref().map(PendingFile::status),
            Some(UploadStatus::Queued)
        )
    }

    /// Validates `file` and makes it the current file, dropping any previous
    /// file and preview. A rejected file leaves the pipeline untouched.
    #[instrument(skip_all, fields(name = %file.name, size = file.bytes.len()))]
    pub fn select_file(
        &mut self,
        file: SelectedFile,
        max_bytes: usize,
    ) -> Result<&PendingFile, UploadError> {
        let format = validate_image(&file, max_bytes)?;
        let preview_data_uri = preview_data_uri(format, &file.bytes);

        if let Some(previous) = &self.current {
            debug!(previous = %previous.token, "replacing selected file");
        }

        self.last_token += 1;
        let pending = PendingFile {
            token: UploadToken(self.last_token),
            file,
            format,
            preview_data_uri,
            status: UploadStatus::Queued,
        };
        Ok(self.current.insert(pending))
    }

    /// Builds the multipart body for the current file and marks it uploading.
    pub fn start_upload(&mut self, boundary: &str) -> Option<UploadRequest> {
        let pending = self.current.as_mut()?;
        if !matches!(pending.status, UploadStatus::Queued | UploadStatus::Failed) {
            warn!(token = %pending.token, status = ?pending.status, "upload already started");
            return None;
        }

        let body = multipart_body(
            boundary,
            &pending.file.name,
            pending.mime_type(),
            &pending.file.bytes,
        );
        pending.status = UploadStatus::Uploading;
        Some(UploadRequest {
            token: pending.token,
            content_type: format!("multipart/form-data; boundary={boundary}"),
            body,
        })
    }

    pub fn complete_upload(&mut self, token: UploadToken, remote_url: String) -> Resolution {
        match self.current_uploading(token) {
            Some(pending) => {
                pending.status = UploadStatus::Uploaded(remote_url);
                Resolution::Applied
            }
            None => Resolution::Stale,
        }
    }

    pub fn fail_upload(&mut self, token: UploadToken) -> Resolution {
        match self.current_uploading(token) {
            Some(pending) => {
                pending.status = UploadStatus::Failed;
                Resolution::Applied
            }
            None => Resolution::Stale,
        }
    }

    /// Drops the current file and its preview.
    pub fn clear(&mut self) {
        self.current = None;
    }

    fn current_uploading(&mut self, token: UploadToken) -> Option<&mut PendingFile> {
        self.current
            .as_mut()
            .filter(|p| p.token == token && p.status == UploadStatus::Uploading)
    }
}

/// Checks the declared MIME type and the actual magic bytes.
pub fn validate_image(file: &SelectedFile, max_bytes: usize) -> Result<ImageFormat, UploadError> {
    let declared = file.mime_type.trim().to_ascii_lowercase();
    let invalid = |reason: &str| UploadError::InvalidFileType {
        declared_mime: file.mime_type.clone(),
        reason: reason.to_string(),
    };

    if !declared.starts_with("image/") {
        return Err(invalid("declared type is not image/*"));
    }
    if file.bytes.is_empty() {
        return Err(invalid("file is empty"));
    }
    if file.bytes.len() > max_bytes {
        return Err(UploadError::FileTooLarge {
            size: file.bytes.len(),
            max: max_bytes,
        });
    }

    let format = image::guess_format(&file.bytes).map_err(|_| invalid("unrecognised content"))?;
    if !ALLOWED_FORMATS.contains(&format) {
        return Err(invalid("unsupported image format"));
    }
    Ok(format)
}

pub fn preview_data_uri(format: ImageFormat, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_for(format), BASE64.encode(bytes))
}

fn mime_for(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "image/png",
        ImageFormat::WebP => "image/webp",
        ImageFormat::Gif => "image/gif",
        _ => "image/jpeg",
    }
}

/// One-part `multipart/form-data` body with the file under field `file`.
pub fn multipart_body(boundary: &str, filename: &str, content_type: &str, bytes: &[u8]) -> Vec<u8> {
    let filename = sanitize_filename(filename);
    let mut body = Vec::with_capacity(bytes.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{MULTIPART_FIELD}\"; filename=\"{filename}\"\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if c == '"' || c == '\\' { '_' } else { c })
        .take(MAX_FILENAME_LENGTH)
        .collect();
    if cleaned.trim().is_empty() {
        "image".to_string()
    } else {
        cleaned
    }
}

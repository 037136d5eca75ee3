//! Upload handling: extension/size policy and disk storage.
//!
//! Files live under `{data_dir}/uploads` with generated names and are
//! served back at `/uploads/{name}`. A rejected file is never written.

use axum::http::StatusCode;
use std::path::Path;
use uuid::Uuid;

use crate::db::models::{KIND_FILE, KIND_IMAGE};

/// Upload size cap: 10 MB.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Allowed upload extensions (lowercase).
const ALLOWED_EXTENSIONS: &[&str] = &[
    "jpeg", "jpg", "png", "gif", "pdf", "doc", "docx", "txt", "zip",
];

/// Extensions rendered inline as images.
const IMAGE_EXTENSIONS: &[&str] = &["jpeg", "jpg", "png", "gif"];

/// A stored upload, ready to hang off a message.
#[derive(Debug, Clone)]
pub struct StoredFile {
    /// Public URL path (/uploads/{name})
    pub url: String,
    /// Original client-side file name
    pub original_name: String,
    /// Message kind derived from the extension: image or file
    pub kind: String,
}

/// Extract and validate the extension of an uploaded file name.
pub fn allowed_extension(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name).extension()?.to_str()?.to_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Message kind for an already-validated extension.
pub fn kind_for_extension(ext: &str) -> &'static str {
    if IMAGE_EXTENSIONS.contains(&ext) {
        KIND_IMAGE
    } else {
        KIND_FILE
    }
}

/// Validate and persist an upload. Policy violations are 400s and leave
/// no file behind; only I/O failures surface as 500.
pub async fn store_upload(
    data_dir: &str,
    original_name: &str,
    data: Vec<u8>,
) -> Result<StoredFile, (StatusCode, String)> {
    let ext = allowed_extension(original_name).ok_or((
        StatusCode::BAD_REQUEST,
        "File type not allowed".to_string(),
    ))?;

    if data.len() > MAX_UPLOAD_BYTES {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("File exceeds the {} MB limit", MAX_UPLOAD_BYTES / 1024 / 1024),
        ));
    }

    let stored_name = format!("{}.{}", Uuid::now_v7(), ext);
    let uploads_dir = Path::new(data_dir).join("uploads");
    let path = uploads_dir.join(&stored_name);

    tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&uploads_dir)?;
        std::fs::write(&path, data)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))?
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Write upload: {}", e)))?;

    Ok(StoredFile {
        url: format!("/uploads/{}", stored_name),
        original_name: original_name.to_string(),
        kind: kind_for_extension(&ext).to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_policy() {
        assert_eq!(allowed_extension("report.PDF").as_deref(), Some("pdf"));
        assert_eq!(allowed_extension("photo.jpeg").as_deref(), Some("jpeg"));
        assert!(allowed_extension("malware.exe").is_none());
        assert!(allowed_extension("no_extension").is_none());
        assert!(allowed_extension("archive.tar.gz").is_none());
    }

    #[test]
    fn kind_from_extension() {
        assert_eq!(kind_for_extension("png"), KIND_IMAGE);
        assert_eq!(kind_for_extension("gif"), KIND_IMAGE);
        assert_eq!(kind_for_extension("pdf"), KIND_FILE);
        assert_eq!(kind_for_extension("zip"), KIND_FILE);
    }
}

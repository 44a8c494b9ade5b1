use std::collections::HashMap;

use axum::extract::multipart::MultipartError;
use axum::extract::Multipart;

use crate::api::response::ApiError;
use crate::dedup::{ContentHasher, HashedUpload, LifecycleError};
use crate::AppState;

/// A multipart upload whose `file` part has been hashed and spooled.
pub(super) struct ReceivedUpload {
    pub upload: HashedUpload,
    pub filename: String,
    pub mime_type: String,
    /// Every other text part, by name
    pub fields: HashMap<String, String>,
}

fn multipart_error(e: MultipartError) -> ApiError {
    ApiError::Fail(e.status(), format!("Invalid multipart data: {}", e.body_text()))
}

/// Stream the `file` part through a [`ContentHasher`] without buffering it.
pub(super) async fn receive_upload(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<ReceivedUpload, ApiError> {
    let mut upload = None;
    let mut filename = None;
    let mut content_type = None;
    let mut fields = HashMap::new();

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or("").to_string();

        if name == "file" {
            if upload.is_some() {
                return Err(ApiError::bad_request("Only one file may be uploaded per request"));
            }
            filename = field.file_name().map(str::to_string);
            content_type = field.content_type().map(str::to_string);

            let mut hasher =
                ContentHasher::new(&state.config.server.spool_dir, state.config.max_upload_size)
                    .map_err(LifecycleError::from)?;
            while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                hasher.update(&chunk).await.map_err(LifecycleError::from)?;
            }
            upload = Some(hasher.finish().await.map_err(LifecycleError::from)?);
        } else if !name.is_empty() {
            let value = field.text().await.map_err(multipart_error)?;
            fields.insert(name, value);
        }
    }

    let upload = upload.ok_or_else(|| ApiError::bad_request("file is required"))?;
    let filename = filename
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "file".to_string());

    // Browsers send octet-stream for anything they don't recognise
    let mime_type = content_type
        .filter(|ct| ct != "application/octet-stream")
        .or_else(|| mime_guess::from_path(&filename).first().map(|m| m.to_string()))
        .unwrap_or_else(|| "application/octet-stream".to_string());

    Ok(ReceivedUpload {
        upload,
        filename,
        mime_type,
        fields,
    })
}

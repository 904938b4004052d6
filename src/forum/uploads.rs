use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

const ALLOWED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "gif"];

/// URL prefix under which stored photos are served.
pub const PUBLIC_PREFIX: &str = "/uploads/";

/// An image submitted alongside a new post.
#[derive(Debug, Clone)]
pub struct PhotoUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Lower-cased extension of `file_name` if it is an accepted image type.
pub fn allowed_extension(file_name: &str) -> AppResult<String> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(ext)
    } else {
        Err(AppError::InvalidInput(
            "Invalid file type. Allowed: .jpg, .jpeg, .png, .gif".into(),
        ))
    }
}

/// Write the photo under `dir` with a random name and return its public path.
/// The client's file name only contributes its extension.
pub fn store_photo(dir: &Path, upload: &PhotoUpload) -> AppResult<String> {
    let ext = allowed_extension(&upload.file_name)?;
    std::fs::create_dir_all(dir)?;

    let name = format!("{}.{}", uuid::Uuid::new_v4(), ext);
    std::fs::write(dir.join(&name), &upload.bytes)?;

    tracing::debug!(file = %name, size = upload.bytes.len(), "photo stored");
    Ok(format!("{}{}", PUBLIC_PREFIX, name))
}

/// Map a public path back to its file under `dir`. Anything that is not a
/// plain file name below the prefix yields `None`.
fn resolve(dir: &Path, public_path: &str) -> Option<PathBuf> {
    let name = public_path.strip_prefix(PUBLIC_PREFIX)?;
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
        return None;
    }
    Some(dir.join(name))
}

/// Best-effort removal of a stored photo.
pub fn remove_photo(dir: &Path, public_path: &str) {
    let Some(path) = resolve(dir, public_path) else {
        return;
    };
    if let Err(e) = std::fs::remove_file(&path) {
        tracing::warn!(path = %path.display(), "could not remove photo: {}", e);
    }
}

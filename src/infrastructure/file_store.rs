//! Date-bucketed file storage for binary artifacts

use crate::infrastructure::audit_store::{StoreError, StoreResult};
use chrono::Utc;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Location of a saved artifact, relative to the storage root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub relative_path: String,
    pub size: u64,
}

/// Saves artifacts under `<root>/<provider>/<YYYY-MM-DD>/<uuid><ext>`
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn save(
        &self,
        provider: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> StoreResult<StoredFile> {
        let bucket = format!(
            "{}/{}",
            sanitize_segment(provider),
            Utc::now().format("%Y-%m-%d")
        );
        let file_name = format!("{}{}", Uuid::now_v7(), extension_for(content_type));
        let relative_path = format!("{bucket}/{file_name}");

        let directory = self.root.join(&bucket);
        tokio::fs::create_dir_all(&directory).await?;
        tokio::fs::write(directory.join(&file_name), bytes).await?;

        debug!(path = %relative_path, size = bytes.len(), "Saved artifact");
        Ok(StoredFile {
            relative_path,
            size: bytes.len() as u64,
        })
    }

    /// Map a stored relative path to its absolute location.
    ///
    /// Only plain path segments are accepted; anything that could climb out of
    /// the root (`..`, `.`, absolute paths, drive prefixes) is rejected.
    pub fn resolve(&self, relative: &str) -> StoreResult<PathBuf> {
        let candidate = Path::new(relative);
        let mut resolved = self.root.clone();
        let mut segments = 0usize;
        for component in candidate.components() {
            match component {
                Component::Normal(segment) => {
                    resolved.push(segment);
                    segments += 1;
                }
                _ => return Err(StoreError::PathTraversal(relative.to_string())),
            }
        }
        if segments == 0 {
            return Err(StoreError::PathTraversal(relative.to_string()));
        }
        Ok(resolved)
    }
}

fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

/// File extension (with leading dot) for a media type
pub fn extension_for(content_type: &str) -> String {
    let media = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let known = match media.as_str() {
        "image/png" => Some(".png"),
        "image/jpeg" | "image/jpg" => Some(".jpg"),
        "image/gif" => Some(".gif"),
        "image/webp" => Some(".webp"),
        "image/svg+xml" => Some(".svg"),
        "application/pdf" => Some(".pdf"),
        "audio/mpeg" => Some(".mp3"),
        "audio/wav" => Some(".wav"),
        "video/mp4" => Some(".mp4"),
        "video/mpeg" => Some(".mpeg"),
        "text/plain" => Some(".txt"),
        "application/json" => Some(".json"),
        _ => None,
    };
    if let Some(ext) = known {
        return ext.to_string();
    }

    match media.split_once('/') {
        Some((_, subtype))
            if !subtype.is_empty()
                && subtype.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') =>
        {
            format!(".{subtype}")
        }
        _ => ".bin".to_string(),
    }
}

/// Media type to serve a stored file with, by extension
pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "mpeg" => "video/mpeg",
        "txt" => "text/plain",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[tokio::test]
    async fn test_save_writes_date_bucketed_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        let stored = store.save("replicate", "image/png", b"\x89PNG").await.unwrap();

        let today = Utc::now().format("%Y-%m-%d").to_string();
        assert!(stored.relative_path.starts_with(&format!("replicate/{today}/")));
        assert!(stored.relative_path.ends_with(".png"));
        assert_eq!(stored.size, 4);

        let absolute = store.resolve(&stored.relative_path).unwrap();
        assert_eq!(tokio::fs::read(absolute).await.unwrap(), b"\x89PNG");
    }

    #[rstest]
    #[case("../etc/passwd")]
    #[case("openai/../../secret")]
    #[case("/etc/passwd")]
    #[case("./openai/file.png")]
    #[case("")]
    fn test_resolve_rejects_escapes(#[case] relative: &str) {
        let store = FileStore::new("/srv/files");
        assert!(matches!(
            store.resolve(relative),
            Err(StoreError::PathTraversal(_))
        ));
    }

    #[rstest]
    #[case("image/png", ".png")]
    #[case("image/jpg", ".jpg")]
    #[case("IMAGE/JPEG; charset=binary", ".jpg")]
    #[case("audio/ogg", ".ogg")]
    #[case("application/vnd.custom+zip", ".bin")]
    #[case("garbage", ".bin")]
    fn test_extension_for(#[case] content_type: &str, #[case] expected: &str) {
        assert_eq!(extension_for(content_type), expected);
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(Path::new("a/b/c.PNG")), "image/png");
        assert_eq!(content_type_for(Path::new("a/b/c")), "application/octet-stream");
    }

    proptest! {
        #[test]
        fn resolved_paths_stay_under_root(segments in prop::collection::vec("[a-zA-Z0-9._-]{1,12}", 1..5)) {
            let store = FileStore::new("/srv/files");
            let relative = segments.join("/");
            if let Ok(resolved) = store.resolve(&relative) {
                prop_assert!(resolved.starts_with("/srv/files"));
                prop_assert!(!resolved.components().any(|c| matches!(c, Component::ParentDir)));
            }
        }
    }
}

//! Attachment file storage
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::submission::SubmissionType;

/// A file handed in by the caller.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content: Vec<u8>,
    pub mime_type: Option<String>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            content: content.into(),
            mime_type: None,
        }
    }
    pub fn set_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// Logical location of an event's files: owner, then submission, then event.
#[derive(Debug, Clone)]
pub struct FolderSpec {
    pub owner_id: String,
    pub submission_type: SubmissionType,
    pub submission_id: String,
    pub event_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub original_name: String,
    pub stored_path: String,
    pub size: u64,
    pub mime_type: Option<String>,
    pub sha256: String,
}

pub trait FileStorage: Send + Sync {
    fn store(&self, folder: &FolderSpec, upload: &Upload) -> Result<StoredFile>;
    fn delete(&self, stored_path: &str) -> Result<()>;
}

/// Writes attachments below a root directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn folder_path(&self, folder: &FolderSpec) -> PathBuf {
        self.root
            .join(sanitize(&folder.owner_id))
            .join(format!(
                "{}_{}",
                folder.submission_type.as_str(),
                sanitize(&folder.submission_id)
            ))
            .join(format!("admin_event_{}", sanitize(&folder.event_id)))
    }
}

/// Keeps letters, digits, `.`, `-` and `_`; anything else becomes `_`.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

fn unique_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{ext}")),
        _ => (file_name, String::new()),
    };
    (1..)
        .map(|n| dir.join(format!("{stem}_{n}{ext}")))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

impl FileStorage for LocalFileStorage {
    fn store(&self, folder: &FolderSpec, upload: &Upload) -> Result<StoredFile> {
        let dir = self.folder_path(folder);
        fs::create_dir_all(&dir)?;
        let path = unique_path(&dir, &sanitize(&upload.file_name));
        fs::write(&path, &upload.content)?;
        tracing::debug!(path = %path.display(), size = upload.content.len(), "stored attachment");

        Ok(StoredFile {
            original_name: upload.file_name.clone(),
            stored_path: path.to_string_lossy().into_owned(),
            size: upload.content.len() as u64,
            mime_type: upload.mime_type.clone(),
            sha256: sha256::digest(upload.content.as_slice()),
        })
    }

    fn delete(&self, stored_path: &str) -> Result<()> {
        match fs::remove_file(stored_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder() -> FolderSpec {
        FolderSpec {
            owner_id: "user_7".into(),
            submission_type: SubmissionType::FundApplication,
            submission_id: "sub_1".into(),
            event_id: "event_1".into(),
        }
    }

    #[test]
    fn sanitize_strips_path_components() {
        assert_eq!(sanitize("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize("  "), "file");
        assert_eq!(sanitize("report 01.pdf"), "report_01.pdf");
    }

    #[test]
    fn store_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path());
        let upload = Upload::new("receipt.pdf", b"%PDF-1.7".to_vec()).set_mime_type("application/pdf");

        let first = storage.store(&folder(), &upload).unwrap();
        let second = storage.store(&folder(), &upload).unwrap();
        assert_ne!(first.stored_path, second.stored_path);
        assert!(second.stored_path.ends_with("receipt_1.pdf"));
        assert_eq!(first.size, 8);
        assert_eq!(first.sha256, sha256::digest(b"%PDF-1.7".as_slice()));

        storage.delete(&first.stored_path).unwrap();
        assert!(!Path::new(&first.stored_path).exists());
        // deleting twice is fine
        storage.delete(&first.stored_path).unwrap();
    }
}

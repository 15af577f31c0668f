use std::path::{Path, PathBuf};

use crate::error::StorageError;

use super::BlobStore;

const FILE_SCHEME: &str = "file://";

/// Move a file from `src` to `dst`. Uses `rename` first (atomic on the same
/// filesystem). Falls back to copy + delete when rename fails.
fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    std::fs::copy(src, dst).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    std::fs::remove_file(src).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Blob store backed by a local directory. References are `file://` URIs.
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        Self {
            root: std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a reference produced by [`BlobStore::put`] back to a path
    /// under the root.
    pub fn resolve(&self, reference: &str) -> Result<PathBuf, StorageError> {
        let path = reference
            .strip_prefix(FILE_SCHEME)
            .map(PathBuf::from)
            .ok_or_else(|| StorageError::ForeignReference(reference.to_string()))?;

        let escapes = path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir));
        if escapes || !path.starts_with(&self.root) {
            return Err(StorageError::ForeignReference(reference.to_string()));
        }
        Ok(path)
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Writes `content` to a fresh temporary sibling of `target`. `create_new`
    /// makes the temp name collision an error instead of a silent overwrite.
    fn write_temp(&self, target: &Path, content: &[u8]) -> Result<PathBuf, StorageError> {
        use std::io::Write;

        let file_name = target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("blob");
        let temp_path = target.with_file_name(format!(
            ".{}.{}.tmp",
            file_name,
            uuid::Uuid::new_v4().simple()
        ));

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .map_err(|e| StorageError::WriteFile {
                path: temp_path.clone(),
                source: e,
            })?;
        let written = file.write_all(content).and_then(|_| file.sync_all());
        if let Err(e) = written {
            let _ = std::fs::remove_file(&temp_path);
            return Err(StorageError::WriteFile {
                path: temp_path,
                source: e,
            });
        }
        Ok(temp_path)
    }
}

impl BlobStore for FilesystemBlobStore {
    fn put(&self, key: &str, content: &[u8]) -> Result<String, StorageError> {
        let target = self.root.join(key);
        let dir = target.parent().unwrap_or(&self.root);
        self.ensure_directory(dir)?;

        let temp_path = self.write_temp(&target, content)?;
        if let Err(e) = move_file(&temp_path, &target) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }

        Ok(format!("{}{}", FILE_SCHEME, target.display()))
    }

    fn delete(&self, reference: &str) -> Result<(), StorageError> {
        let path = self.resolve(reference)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFile { path, source: e }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_writes_file_and_returns_uri() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemBlobStore::new(temp_dir.path());

        let reference = store.put("resumes/b1/j1_cv.pdf", b"%PDF-1.7").unwrap();
        assert!(reference.starts_with("file://"));
        assert!(reference.ends_with("resumes/b1/j1_cv.pdf"));

        let path = store.resolve(&reference).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.7");
    }

    #[test]
    fn test_put_creates_nested_directories() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemBlobStore::new(temp_dir.path());

        store.put("deep/nested/key.bin", b"x").unwrap();
        assert!(temp_dir.path().join("deep/nested/key.bin").exists());
    }

    #[test]
    fn test_put_leaves_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemBlobStore::new(temp_dir.path());

        store.put("resumes/b1/a.pdf", b"a").unwrap();
        let entries: Vec<_> = std::fs::read_dir(temp_dir.path().join("resumes/b1"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec!["a.pdf".to_string()]);
    }

    #[test]
    fn test_put_overwrites_same_key() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemBlobStore::new(temp_dir.path());

        let first = store.put("k.bin", b"first").unwrap();
        let second = store.put("k.bin", b"second").unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read(temp_dir.path().join("k.bin")).unwrap(), b"second");
    }

    #[test]
    fn test_put_empty_content() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemBlobStore::new(temp_dir.path());

        let reference = store.put("empty.bin", &[]).unwrap();
        let path = store.resolve(&reference).unwrap();
        assert!(std::fs::read(path).unwrap().is_empty());
    }

    #[test]
    fn test_delete_removes_and_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemBlobStore::new(temp_dir.path());

        let reference = store.put("resumes/b1/j1.pdf", b"x").unwrap();
        store.delete(&reference).unwrap();
        assert!(!temp_dir.path().join("resumes/b1/j1.pdf").exists());
        store.delete(&reference).unwrap();
    }

    #[test]
    fn test_delete_rejects_foreign_references() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemBlobStore::new(temp_dir.path().join("blobs"));

        assert!(matches!(
            store.delete("https://example.com/cv.pdf"),
            Err(StorageError::ForeignReference(_))
        ));
        assert!(matches!(
            store.delete("file:///etc/passwd"),
            Err(StorageError::ForeignReference(_))
        ));

        let sneaky = format!("file://{}/blobs/../secret", temp_dir.path().display());
        assert!(matches!(
            store.delete(&sneaky),
            Err(StorageError::ForeignReference(_))
        ));
    }

    #[test]
    fn test_root_accessor() {
        let temp_dir = TempDir::new().unwrap();
        let store = FilesystemBlobStore::new(temp_dir.path());
        assert_eq!(store.root(), temp_dir.path());
    }
}

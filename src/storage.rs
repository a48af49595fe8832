//! Local file storage used by the file transfer operations.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Where downloaded files are written and uploaded files are read from.
pub trait Storage {
    type Reader: Read;
    type Writer: Write;

    fn open_read(&self, name: &str) -> io::Result<Self::Reader>;
    /// Creates the file, truncating an existing one.
    fn create(&self, name: &str) -> io::Result<Self::Writer>;
}

/// Files on the local file system. Relative names resolve against `root`.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        LocalStorage {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl Default for LocalStorage {
    fn default() -> Self {
        LocalStorage::new(".")
    }
}

impl Storage for LocalStorage {
    type Reader = File;
    type Writer = File;

    fn open_read(&self, name: &str) -> io::Result<File> {
        File::open(self.path(name))
    }

    fn create(&self, name: &str) -> io::Result<File> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.path(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_create_truncates_and_reads_back() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        fs::write(dir.path().join("a.bin"), b"old contents here").unwrap();

        let mut writer = storage.create("a.bin").unwrap();
        writer.write_all(b"new").unwrap();
        drop(writer);

        let mut contents = Vec::new();
        storage
            .open_read("a.bin")
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert_eq!(contents, b"new");
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let err = storage.open_read("missing").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_absolute_name_ignores_root() {
        let dir = tempdir().unwrap();
        let absolute = dir.path().join("abs.txt");
        let storage = LocalStorage::new("/nonexistent-root");
        assert_eq!(storage.path(absolute.to_str().unwrap()), absolute);
    }
}

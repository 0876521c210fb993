//! Data directory management: SSTable file naming, numbering, and
//! handles for reading and writing.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::error::Result;

const SSTABLE_EXT: &str = "sst";

/// Descriptor for one SSTable file. File numbers are dense, unique, and
/// strictly increasing over the directory's lifetime, and the zero-padded
/// file names sort the same way, so lexical order is recency order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    file_num: u64,
    path: PathBuf,
}

impl FileMeta {
    pub fn file_num(&self) -> u64 {
        self.file_num
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Owns a data directory and the SSTable file-number counter.
pub struct Provider {
    dir: PathBuf,
    next_file_num: u64,
}

impl Provider {
    /// Opens the directory, creating it if missing, and resumes file
    /// numbering above the largest SSTable already present.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut provider = Self {
            dir,
            next_file_num: 1,
        };
        if let Some(last) = provider.list_files()?.last() {
            provider.next_file_num = last.file_num() + 1;
        }
        Ok(provider)
    }

    /// Enumerates the directory's SSTable files in ascending file-number
    /// order. Files that do not follow the SSTable naming convention are
    /// skipped.
    pub fn list_files(&self) -> Result<Vec<FileMeta>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if let Some(file_num) = parse_sstable_file_num(&path) {
                files.push(FileMeta { file_num, path });
            }
        }
        files.sort_by_key(|meta| meta.file_num);
        Ok(files)
    }

    /// Allocates the next file number and returns the metadata for a new
    /// SSTable. The file itself is not created until opened for writing.
    pub fn prepare_new_file(&mut self) -> FileMeta {
        let file_num = self.next_file_num;
        self.next_file_num += 1;
        FileMeta {
            file_num,
            path: self.dir.join(format!("{file_num:08}.{SSTABLE_EXT}")),
        }
    }

    pub fn open_for_reading(&self, meta: &FileMeta) -> Result<File> {
        Ok(File::open(&meta.path)?)
    }

    pub fn open_for_writing(&self, meta: &FileMeta) -> Result<File> {
        Ok(File::create(&meta.path)?)
    }
}

fn parse_sstable_file_num(path: &Path) -> Option<u64> {
    if path.extension()?.to_str()? != SSTABLE_EXT {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_numbering_is_dense_and_increasing() {
        let dir = TempDir::new().unwrap();
        let mut provider = Provider::open(dir.path()).unwrap();

        let first = provider.prepare_new_file();
        let second = provider.prepare_new_file();
        assert_eq!(first.file_num(), 1);
        assert_eq!(second.file_num(), 2);
        assert!(first.path().to_str().unwrap() < second.path().to_str().unwrap());
    }

    #[test]
    fn test_list_files_sorted_by_recency() {
        let dir = TempDir::new().unwrap();
        let mut provider = Provider::open(dir.path()).unwrap();

        for _ in 0..3 {
            let meta = provider.prepare_new_file();
            provider.open_for_writing(&meta).unwrap();
        }

        let files = provider.list_files().unwrap();
        let nums: Vec<u64> = files.iter().map(FileMeta::file_num).collect();
        assert_eq!(nums, vec![1, 2, 3]);
    }

    #[test]
    fn test_numbering_resumes_after_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut provider = Provider::open(dir.path()).unwrap();
            for _ in 0..2 {
                let meta = provider.prepare_new_file();
                provider.open_for_writing(&meta).unwrap();
            }
        }

        let mut provider = Provider::open(dir.path()).unwrap();
        assert_eq!(provider.prepare_new_file().file_num(), 3);
    }

    #[test]
    fn test_foreign_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("garbage.sst"), b"x").unwrap();

        let mut provider = Provider::open(dir.path()).unwrap();
        assert!(provider.list_files().unwrap().is_empty());
        assert_eq!(provider.prepare_new_file().file_num(), 1);
    }
}

//! Printer storage access.
//!
//! The printer's SD card is reached through [`RemoteStorage`]. The bridge
//! ships [`LocalDirStorage`], which treats a directory as the card; an FTPS
//! client for the real printer implements the same trait.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use bambulink_core::UploadError;
use chrono::{DateTime, Datelike, Timelike, Utc};

/// File extensions the printer can start
pub const PRINTABLE_EXTENSIONS: &[&str] = &["gcode", "3mf"];

/// A file on the printer storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdFile {
    /// Full file name
    pub name: String,
    /// 8.3 alias reported in listings
    pub short_name: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: Option<DateTime<Utc>>,
}

impl SdFile {
    /// Create an entry, using the full name as its alias until
    /// [`assign_short_names`] runs
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        let name = name.into();
        Self {
            short_name: name.clone(),
            name,
            size,
            modified: None,
        }
    }

    /// Builder method to set the modification time
    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }

    /// Whether a host-supplied name refers to this file
    ///
    /// Hosts send either alias or full name, in any case, sometimes with a
    /// leading slash.
    pub fn matches(&self, requested: &str) -> bool {
        let requested = requested.trim().trim_start_matches('/');
        requested.eq_ignore_ascii_case(&self.name) || requested.eq_ignore_ascii_case(&self.short_name)
    }

    /// Modification time packed as a FAT date/time, as Marlin prints with `M20 T`
    pub fn fat_timestamp(&self) -> Option<u32> {
        let modified = self.modified?;
        let year = u32::try_from(modified.year() - 1980).ok()?;
        let date = (year << 9) | (modified.month() << 5) | modified.day();
        let time = (modified.hour() << 11) | (modified.minute() << 5) | (modified.second() / 2);
        Some((date << 16) | time)
    }
}

/// Whether the printer can start this file
pub fn is_printable(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            PRINTABLE_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

/// Give every file a unique upper-case 8.3 alias (`BENCHY~1.3MF`)
pub fn assign_short_names(files: &mut [SdFile]) {
    let mut taken = HashSet::new();

    for file in files.iter_mut() {
        let (stem, ext) = match file.name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, ext),
            _ => (file.name.as_str(), ""),
        };
        let stem: String = stem
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect();
        let ext: String = ext
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .take(3)
            .collect();

        let stem = if stem.is_empty() { "FILE".to_string() } else { stem };
        let mut counter = 1;
        let short_name = loop {
            let suffix = format!("~{}", counter);
            let base: String = stem.chars().take(8 - suffix.len()).collect();
            let candidate = if ext.is_empty() {
                format!("{}{}", base, suffix)
            } else {
                format!("{}{}.{}", base, suffix, ext)
            };
            if taken.insert(candidate.clone()) {
                break candidate;
            }
            counter += 1;
        };
        file.short_name = short_name;
    }
}

/// Printer-side file storage
pub trait RemoteStorage: Send + Sync {
    /// Copy a local file to the printer under `remote_name`
    fn upload_file(&self, local_path: &Path, remote_name: &str) -> Result<(), UploadError>;

    /// Printable files currently on the printer
    fn list_files(&self) -> Result<Vec<SdFile>, UploadError>;

    /// Remove a file from the printer
    fn delete_file(&self, remote_name: &str) -> Result<(), UploadError>;
}

/// A directory standing in for the printer SD card
#[derive(Debug, Clone)]
pub struct LocalDirStorage {
    root: PathBuf,
}

impl LocalDirStorage {
    /// Use `root` as the card, creating it if needed
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, UploadError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| storage_error(&root, e))?;
        Ok(Self { root })
    }

    /// Directory backing the card
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, remote_name: &str) -> Result<PathBuf, UploadError> {
        let name = remote_name.trim().trim_start_matches('/');
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(UploadError::InvalidFileName {
                filename: remote_name.to_string(),
            });
        }
        Ok(self.root.join(name))
    }
}

impl RemoteStorage for LocalDirStorage {
    fn upload_file(&self, local_path: &Path, remote_name: &str) -> Result<(), UploadError> {
        let target = self.resolve(remote_name)?;
        if !local_path.is_file() {
            return Err(UploadError::FileNotFound {
                filename: local_path.display().to_string(),
            });
        }
        fs::copy(local_path, &target).map_err(|e| storage_error(&target, e))?;
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<SdFile>, UploadError> {
        let entries = fs::read_dir(&self.root).map_err(|e| storage_error(&self.root, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| storage_error(&self.root, e))?;
            let metadata = match entry.metadata() {
                Ok(metadata) if metadata.is_file() => metadata,
                _ => continue,
            };
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !is_printable(&name) {
                continue;
            }

            let mut file = SdFile::new(name, metadata.len());
            if let Ok(modified) = metadata.modified() {
                file = file.with_modified(DateTime::<Utc>::from(modified));
            }
            files.push(file);
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        assign_short_names(&mut files);
        Ok(files)
    }

    fn delete_file(&self, remote_name: &str) -> Result<(), UploadError> {
        let target = self.resolve(remote_name)?;
        if !target.is_file() {
            return Err(UploadError::FileNotFound {
                filename: remote_name.to_string(),
            });
        }
        fs::remove_file(&target).map_err(|e| storage_error(&target, e))
    }
}

fn storage_error(path: &Path, error: std::io::Error) -> UploadError {
    UploadError::Storage {
        reason: format!("{}: {}", path.display(), error),
    }
}

//! Flat directory of image files: the single source of truth for which
//! photos exist.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::ProtocolError;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "heic"];

const PARTIAL_SUFFIX: &str = ".partial";

static NEXT_INCOMING: AtomicU64 = AtomicU64::new(0);
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoEntry {
    pub name: String,
    pub size_bytes: u64,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    Missing,
}

#[derive(Debug, Clone)]
pub struct PhotoStore {
    root: PathBuf,
    generations: Generations,
}

/// Per-name change counter. Every replace or remove through the store hands
/// the name a value it never had before; untouched names read as 0.
#[derive(Debug, Clone, Default)]
struct Generations(Arc<Mutex<HashMap<String, u64>>>);

impl Generations {
    fn get(&self, name: &str) -> u64 {
        let map = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        map.get(name).copied().unwrap_or(0)
    }

    fn bump(&self, name: &str) {
        let next = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        let mut map = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        map.insert(name.to_string(), next);
    }
}

impl PhotoStore {
    /// Create the directory if needed and drop partial files left behind by
    /// an interrupted transfer.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let store = Self {
            root,
            generations: Generations::default(),
        };
        let stale = store.remove_partials()?;
        if stale > 0 {
            info!(stale, root = %store.root.display(), "removed interrupted transfers");
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Non-recursive listing of recognized images, sorted by name.
    pub fn list(&self) -> io::Result<Vec<PhotoEntry>> {
        if !self.root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("photo store {} is not a directory", self.root.display()),
            ));
        }
        let mut out = Vec::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let Some(name) = entry.file_name().to_str() else {
                debug!(path = %entry.path().display(), "skipping non UTF-8 file name");
                continue;
            };
            if name.starts_with('.') || !is_image_name(name) {
                continue;
            }
            let size_bytes = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(err) => {
                    debug!(name, error = %err, "file vanished while listing");
                    continue;
                }
            };
            out.push(PhotoEntry {
                name: name.to_string(),
                size_bytes,
                path: entry.path().to_path_buf(),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    pub fn names(&self) -> io::Result<Vec<String>> {
        Ok(self.list()?.into_iter().map(|e| e.name).collect())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.path_of(name).is_file()
    }

    /// Changes whenever `name` is replaced or removed through this store.
    pub fn generation(&self, name: &str) -> u64 {
        self.generations.get(name)
    }

    pub fn size_of(&self, name: &str) -> Option<u64> {
        fs::metadata(self.path_of(name))
            .ok()
            .filter(|m| m.is_file())
            .map(|m| m.len())
    }

    pub fn remove(&self, name: &str) -> io::Result<RemoveOutcome> {
        let path = self.path_of(name);
        if !path.exists() {
            debug!(path = %path.display(), "delete: source missing; skipping");
            return Ok(RemoveOutcome::Missing);
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                self.generations.bump(name);
                info!(path = %path.display(), "delete: removed");
                Ok(RemoveOutcome::Removed)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "delete: source vanished during remove; skipping");
                Ok(RemoveOutcome::Missing)
            }
            Err(e) => Err(e),
        }
    }

    /// Remove every regular file in the store, images or not. Transfers still
    /// in flight keep their partial files.
    pub fn remove_all(&self) -> io::Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            if is_partial_name(&name) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    self.generations.bump(&name);
                    removed += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        info!(removed, root = %self.root.display(), "removed all files");
        Ok(removed)
    }

    /// Reserve a hidden partial file for `name`; nothing becomes visible in
    /// the store until [`IncomingFile::commit`]. Concurrent writers of the
    /// same name each get their own partial file.
    pub fn incoming(&self, name: &str) -> IncomingFile {
        let seq = NEXT_INCOMING.fetch_add(1, Ordering::Relaxed);
        IncomingFile {
            name: name.to_string(),
            partial: self
                .root
                .join(format!(".{name}.{seq}{PARTIAL_SUFFIX}")),
            target: self.path_of(name),
            generations: self.generations.clone(),
        }
    }

    fn remove_partials(&self) -> io::Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if is_partial_name(name) {
                match fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(err) => warn!(name, error = %err, "failed to remove partial file"),
                }
            }
        }
        Ok(removed)
    }
}

/// A file being written into the store.
#[derive(Debug)]
pub struct IncomingFile {
    name: String,
    partial: PathBuf,
    target: PathBuf,
    generations: Generations,
}

impl IncomingFile {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn create_async(&self) -> io::Result<tokio::fs::File> {
        tokio::fs::File::create(&self.partial).await
    }

    pub fn create_blocking(&self) -> io::Result<fs::File> {
        fs::File::create(&self.partial)
    }

    /// Move the completed file into place. Returns `true` when an existing
    /// photo of the same name was replaced.
    pub fn commit(self) -> io::Result<bool> {
        let replaced = self.target.is_file();
        if let Err(err) = fs::rename(&self.partial, &self.target) {
            self.discard();
            return Err(err);
        }
        self.generations.bump(&self.name);
        debug!(name = %self.name, replaced, "incoming file committed");
        Ok(replaced)
    }

    pub fn discard(self) {
        match fs::remove_file(&self.partial) {
            Ok(()) => debug!(name = %self.name, "incoming file discarded"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(name = %self.name, error = %e, "failed to discard partial file"),
        }
    }
}

fn is_partial_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX)
}

#[inline]
pub fn is_image_name(name: &str) -> bool {
    matches!(
        Path::new(name)
            .extension()
            .and_then(OsStr::to_str)
            .map(|s| s.to_ascii_lowercase()),
        Some(ref e) if IMAGE_EXTENSIONS.contains(&e.as_str())
    )
}

/// Accept only plain image file names that cannot escape the store.
pub fn validate_name(name: &str) -> Result<(), ProtocolError> {
    validate_plain_name(name)?;
    if is_image_name(name) {
        Ok(())
    } else {
        Err(ProtocolError::InvalidName(name.to_string()))
    }
}

/// A single path component that is not hidden and cannot escape the store.
pub fn validate_plain_name(name: &str) -> Result<(), ProtocolError> {
    let plain = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && Path::new(name).file_name() == Some(OsStr::new(name));
    if plain {
        Ok(())
    } else {
        Err(ProtocolError::InvalidName(name.to_string()))
    }
}

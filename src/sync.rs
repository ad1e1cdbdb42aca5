//! Delta reconciliation of the local store against a remote directory.
//!
//! Deletions run first and are never rolled back. Downloads are best effort:
//! the first failure aborts the remaining downloads.

pub mod ftp;

use std::collections::HashSet;
use std::io::{self, Write};

use config_model::SyncConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::MetadataCache;
use crate::error::SyncError;
use crate::events::SyncProgress;
use crate::store::{self, PhotoStore, RemoveOutcome};

pub use ftp::FtpConnector;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub size_bytes: u64,
}

/// An authenticated session positioned in the remote photo directory.
pub trait RemoteDirectory: Send {
    /// Regular files in the directory, non-recursive.
    fn list(&mut self) -> Result<Vec<RemoteEntry>, SyncError>;

    /// Stream `name` into `out`, returning the number of bytes written.
    fn download(&mut self, name: &str, out: &mut dyn Write) -> Result<u64, SyncError>;

    /// Log out and disconnect. Failures are only logged.
    fn close(&mut self);
}

pub trait RemoteConnector: Send + Sync {
    fn connect(&self, config: &SyncConfig) -> Result<Box<dyn RemoteDirectory>, SyncError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub deleted: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub remote_total: usize,
}

/// Connect, reconcile, and always close the session.
///
/// Blocking. [`Frame`](crate::frame::Frame) runs the same steps but holds
/// the store's exclusive region only around [`RemoteSession::apply`].
pub fn run(
    connector: &dyn RemoteConnector,
    config: &SyncConfig,
    store: &PhotoStore,
    cache: &MetadataCache,
    cancel: &CancellationToken,
    progress: &dyn Fn(SyncProgress),
) -> Result<SyncReport, SyncError> {
    let result = RemoteSession::open(connector, config, progress).and_then(|mut session| {
        let result = session.apply(store, cache, cancel, progress);
        session.close();
        result
    });
    finish(&result, progress);
    result
}

/// Log the outcome of a run and report it as the final progress step.
pub fn finish(result: &Result<SyncReport, SyncError>, progress: &dyn Fn(SyncProgress)) {
    match result {
        Ok(report) => {
            info!(
                deleted = report.deleted,
                downloaded = report.downloaded,
                skipped = report.skipped,
                remote = report.remote_total,
                "sync: complete"
            );
            progress(SyncProgress::Complete);
        }
        Err(err) => {
            warn!(error = %err, "sync: failed");
            progress(SyncProgress::Failed(err.to_string()));
        }
    }
}

/// A connected remote directory together with its listing.
pub struct RemoteSession {
    remote: Box<dyn RemoteDirectory>,
    files: Vec<RemoteEntry>,
}

impl RemoteSession {
    /// Connect and list. Touches no local state, so it may run without the
    /// store's exclusive region.
    pub fn open(
        connector: &dyn RemoteConnector,
        config: &SyncConfig,
        progress: &dyn Fn(SyncProgress),
    ) -> Result<Self, SyncError> {
        progress(SyncProgress::Connecting);
        info!(address = %config.address(), "sync: connecting");
        let mut remote = connector.connect(config)?;
        progress(SyncProgress::Listing);
        let listed = match remote.list() {
            Ok(listed) => listed,
            Err(err) => {
                remote.close();
                return Err(err);
            }
        };
        let files = listed
            .into_iter()
            .filter(|entry| {
                if !store::is_image_name(&entry.name) {
                    return false;
                }
                if let Err(err) = store::validate_name(&entry.name) {
                    warn!(error = %err, "sync: skipping remote file");
                    return false;
                }
                true
            })
            .collect();
        Ok(Self { remote, files })
    }

    /// Images found on the remote, in listing order.
    pub fn remote_files(&self) -> &[RemoteEntry] {
        &self.files
    }

    /// Make the local store mirror the listing: delete what the remote lacks,
    /// then download what is new or differs in size.
    pub fn apply(
        &mut self,
        store: &PhotoStore,
        cache: &MetadataCache,
        cancel: &CancellationToken,
        progress: &dyn Fn(SyncProgress),
    ) -> Result<SyncReport, SyncError> {
        let remote_names: HashSet<&str> = self.files.iter().map(|e| e.name.as_str()).collect();
        let mut report = SyncReport {
            remote_total: self.files.len(),
            ..SyncReport::default()
        };

        let doomed: Vec<String> = store
            .names()?
            .into_iter()
            .filter(|name| !remote_names.contains(name.as_str()))
            .collect();
        if !doomed.is_empty() {
            progress(SyncProgress::Deleting(doomed.len()));
        }
        for name in &doomed {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            if store.remove(name)? == RemoveOutcome::Removed {
                report.deleted += 1;
            }
            cache.forget(name);
        }

        let wanted: Vec<&RemoteEntry> = self
            .files
            .iter()
            .filter(|entry| store.size_of(&entry.name) != Some(entry.size_bytes))
            .collect();
        report.skipped = self.files.len() - wanted.len();
        if !wanted.is_empty() {
            progress(SyncProgress::Downloading(wanted.len()));
        }
        for entry in wanted {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            download(self.remote.as_mut(), store, cache, entry)?;
            report.downloaded += 1;
        }
        Ok(report)
    }

    pub fn close(mut self) {
        self.remote.close();
    }
}

fn download(
    remote: &mut dyn RemoteDirectory,
    store: &PhotoStore,
    cache: &MetadataCache,
    entry: &RemoteEntry,
) -> Result<(), SyncError> {
    debug!(name = %entry.name, bytes = entry.size_bytes, "sync: downloading");
    let incoming = store.incoming(&entry.name);
    let written = incoming.create_blocking().map_err(SyncError::from).and_then(|file| {
        let mut out = io::BufWriter::new(file);
        let written = remote.download(&entry.name, &mut out)?;
        out.flush()?;
        Ok(written)
    });
    let written = match written {
        Ok(written) => written,
        Err(err) => {
            incoming.discard();
            return Err(err);
        }
    };
    if written != entry.size_bytes {
        incoming.discard();
        return Err(SyncError::Transfer {
            name: entry.name.clone(),
            detail: format!("expected {} bytes, received {written}", entry.size_bytes),
        });
    }
    if incoming.commit()? {
        // New content, new place.
        cache.remove_location(&entry.name);
    }
    Ok(())
}

//! Process-wide owner of the photo store and everything derived from it.
//!
//! Every mutation of the store or caches runs inside one exclusive region
//! (`Inventory` behind a tokio mutex) that also recomputes the display
//! sequence before it is released. Read-only callers use the `watch`
//! snapshots published at the end of each mutation.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::MetadataCache;
use crate::config::{Configuration, DisplayConfig, OrientationPreference, ScreenGeometry, SyncConfig};
use crate::error::SyncError;
use crate::events::{SyncProgress, SyncStatus};
use crate::location::{self, CoordinatesOnly, PlaceResolver};
use crate::metadata::{ExifMetadataReader, MetadataReader};
use crate::orientation::Orientation;
use crate::platform::display::{DisplayHost, FixedDisplay};
use crate::selector::{self, PhotoAsset, Playlist};
use crate::store::{IncomingFile, PhotoStore, RemoveOutcome};
use crate::sync::{self, FtpConnector, RemoteConnector, RemoteSession, SyncReport};

/// External systems the frame consults.
#[derive(Clone)]
pub struct Collaborators {
    pub reader: Arc<dyn MetadataReader>,
    pub resolver: Arc<dyn PlaceResolver>,
    pub display: Arc<dyn DisplayHost>,
    pub connector: Arc<dyn RemoteConnector>,
}

impl Collaborators {
    /// EXIF reader, no geocoder, configured screen geometry, FTP sync.
    pub fn headless(display: &DisplayConfig) -> Self {
        Self {
            reader: Arc::new(ExifMetadataReader),
            resolver: Arc::new(CoordinatesOnly),
            display: Arc::new(FixedDisplay::new(display.screen)),
            connector: Arc::new(FtpConnector),
        }
    }
}

/// Per-display facts about one photo. Recomputed on every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoDetails {
    pub name: String,
    pub location: Option<String>,
    pub capture_year: Option<i32>,
}

struct Shared {
    display_config: DisplayConfig,
    sync_config: Option<SyncConfig>,
    store: PhotoStore,
    cache: Arc<MetadataCache>,
    collaborators: Collaborators,
    listing: watch::Sender<Vec<String>>,
    sequence: watch::Sender<Vec<PhotoAsset>>,
    sync_status: watch::Sender<SyncStatus>,
    sync_running: AtomicBool,
    shutdown: CancellationToken,
}

struct Inventory {
    assets: Vec<PhotoAsset>,
    /// Orientation memo keyed by name; stale once the size changes.
    geometry: HashMap<String, (u64, Option<Orientation>)>,
    playlist: Playlist,
    target: Orientation,
    rng: StdRng,
}

#[derive(Clone)]
pub struct Frame {
    shared: Arc<Shared>,
    inventory: Arc<Mutex<Inventory>>,
}

impl Frame {
    /// Open the configured store and cache with headless collaborators.
    pub fn open(config: &Configuration) -> Result<Self> {
        let store = PhotoStore::open(&config.photo_library_path).with_context(|| {
            format!(
                "failed to open photo library {}",
                config.photo_library_path.display()
            )
        })?;
        let cache = Arc::new(MetadataCache::open_or_memory(&config.cache_path()));
        let collaborators = Collaborators::headless(&config.display);
        Self::new(config, store, cache, collaborators).context("failed to load photo library")
    }

    /// Prune cache entries for files that no longer exist and compute the
    /// first display sequence.
    pub fn new(
        config: &Configuration,
        store: PhotoStore,
        cache: Arc<MetadataCache>,
        collaborators: Collaborators,
    ) -> io::Result<Self> {
        let present: HashSet<String> = store.names()?.into_iter().collect();
        let pruned = cache.retain(|name| present.contains(name));
        if pruned > 0 {
            info!(pruned, "dropped cache entries for missing photos");
        }

        let target = match config.display.orientation {
            OrientationPreference::Landscape => Orientation::Landscape,
            OrientationPreference::Portrait => Orientation::Portrait,
            OrientationPreference::Auto => collaborators
                .display
                .orientation()
                .unwrap_or(Orientation::Landscape),
        };
        let rng = match config.startup_shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let shared = Shared {
            display_config: config.display.clone(),
            sync_config: config.sync.clone(),
            store,
            cache,
            collaborators,
            listing: watch::Sender::new(Vec::new()),
            sequence: watch::Sender::new(Vec::new()),
            sync_status: watch::Sender::new(SyncStatus::default()),
            sync_running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        };
        let mut inventory = Inventory {
            assets: Vec::new(),
            geometry: HashMap::new(),
            playlist: Playlist::default(),
            target,
            rng,
        };
        shared.relist(&mut inventory)?;
        info!(
            photos = inventory.assets.len(),
            orientation = %target,
            "photo library loaded"
        );
        Ok(Self {
            shared: Arc::new(shared),
            inventory: Arc::new(Mutex::new(inventory)),
        })
    }

    pub fn store(&self) -> &PhotoStore {
        &self.shared.store
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.shared.cache
    }

    /// Cancelled on teardown; background syncs started by the frame observe it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown.clone()
    }

    // ------------------------------------------------------------------
    // Read-only snapshots
    // ------------------------------------------------------------------

    pub fn list_files(&self) -> Vec<String> {
        self.shared.listing.borrow().clone()
    }

    pub fn display_sequence(&self) -> Vec<PhotoAsset> {
        self.shared.sequence.borrow().clone()
    }

    pub fn subscribe_sequence(&self) -> watch::Receiver<Vec<PhotoAsset>> {
        self.shared.sequence.subscribe()
    }

    pub fn location_entries(&self) -> Vec<(String, String)> {
        self.shared.cache.locations()
    }

    pub fn history_entries(&self) -> Vec<(String, i64)> {
        self.shared.cache.history_entries()
    }

    pub fn device_info(&self) -> Option<ScreenGeometry> {
        self.shared.collaborators.display.geometry()
    }

    pub fn display_config(&self) -> &DisplayConfig {
        &self.shared.display_config
    }

    pub fn sync_config(&self) -> Option<&SyncConfig> {
        self.shared.sync_config.as_ref()
    }

    pub fn is_quiet_now(&self) -> bool {
        self.is_quiet_at(Utc::now())
    }

    pub fn is_quiet_at(&self, instant: DateTime<Utc>) -> bool {
        self.shared.display_config.is_quiet_at(instant)
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Delete one file and its cache entries. Cache entries are dropped even
    /// when the file was already gone.
    pub async fn delete_file(&self, name: &str) -> io::Result<RemoveOutcome> {
        let name = name.to_string();
        flatten(
            self.exclusive(move |shared, inv| {
                let outcome = shared.store.remove(&name)?;
                shared.cache.forget(&name);
                inv.geometry.remove(&name);
                shared.relist(inv)?;
                Ok(outcome)
            })
            .await,
        )
    }

    pub async fn delete_all_files(&self) -> io::Result<usize> {
        flatten(
            self.exclusive(|shared, inv| {
                let removed = shared.store.remove_all()?;
                shared.cache.clear_all();
                inv.geometry.clear();
                shared.relist(inv)?;
                Ok(removed)
            })
            .await,
        )
    }

    /// Publish a fully written incoming file. Returns `true` when it replaced
    /// an existing photo, whose cached location is then dropped.
    pub async fn commit_incoming(&self, incoming: IncomingFile) -> io::Result<bool> {
        flatten(
            self.exclusive(move |shared, inv| {
                let name = incoming.name().to_string();
                let replaced = incoming.commit()?;
                if replaced {
                    shared.cache.remove_location(&name);
                }
                inv.geometry.remove(&name);
                shared.relist(inv)?;
                info!(name = %name, replaced, "photo stored");
                Ok(replaced)
            })
            .await,
        )
    }

    pub async fn clear_locations(&self) {
        let _inv = self.inventory.lock().await;
        self.shared.cache.clear_locations();
    }

    pub async fn clear_history(&self) {
        let mut inv = self.inventory.lock().await;
        self.shared.cache.clear_history();
        self.shared.reshuffle(&mut inv);
    }

    /// Re-read the store, e.g. after files were changed behind our back.
    pub async fn refresh(&self) -> io::Result<usize> {
        flatten(
            self.exclusive(|shared, inv| {
                shared.relist(inv)?;
                Ok(inv.assets.len())
            })
            .await,
        )
    }

    pub async fn orientation(&self) -> Orientation {
        self.inventory.lock().await.target
    }

    /// Switch the orientation filter; recomputes the sequence on change.
    pub async fn set_orientation(&self, target: Orientation) {
        let mut inv = self.inventory.lock().await;
        if inv.target == target {
            return;
        }
        info!(from = %inv.target, to = %target, "display orientation changed");
        inv.target = target;
        self.shared.reshuffle(&mut inv);
    }

    /// Next photo of the current sequence, recomputing once it is used up.
    pub async fn next_photo(&self) -> Option<PhotoAsset> {
        let mut inv = self.inventory.lock().await;
        if inv.playlist.is_exhausted() {
            self.shared.reshuffle(&mut inv);
        }
        inv.playlist.next()
    }

    /// Record `name` as shown now. Ignored for photos not in the store.
    pub async fn on_photo_shown(&self, name: &str) -> bool {
        let _inv = self.inventory.lock().await;
        if !self.shared.store.contains(name) {
            debug!(name, "shown photo no longer in store; history not recorded");
            return false;
        }
        self.shared.cache.record_shown(name, now_ms())
    }

    /// Location and capture year for display.
    ///
    /// Geocoding runs outside the exclusive region. A freshly resolved place
    /// is cached only if the file was neither replaced nor removed meanwhile.
    pub async fn describe(&self, name: &str) -> PhotoDetails {
        let generation = {
            let _inv = self.inventory.lock().await;
            self.shared.store.generation(name)
        };
        let shared = Arc::clone(&self.shared);
        let owned = name.to_string();
        let (mut details, resolved) =
            match tokio::task::spawn_blocking(move || shared.describe(&owned)).await {
                Ok(found) => found,
                Err(err) => {
                    warn!(name, error = %err, "photo details lookup failed");
                    return PhotoDetails {
                        name: name.to_string(),
                        location: None,
                        capture_year: None,
                    };
                }
            };
        let Some(place) = resolved else {
            return details;
        };
        let _inv = self.inventory.lock().await;
        let store = &self.shared.store;
        if store.contains(name) && store.generation(name) == generation {
            if self.shared.cache.insert_location(name, &place) {
                debug!(name, place = %place, "location cached");
            }
            details.location = self.shared.cache.location(name);
        } else {
            debug!(name, "photo changed while its place was resolved; not cached");
        }
        details
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    pub fn sync_status(&self) -> SyncStatus {
        self.shared.sync_status.borrow().clone()
    }

    pub fn subscribe_sync(&self) -> watch::Receiver<SyncStatus> {
        self.shared.sync_status.subscribe()
    }

    pub fn last_sync_error(&self) -> Option<String> {
        self.shared.sync_status.borrow().last_error.clone()
    }

    pub fn clear_sync_error(&self) {
        self.shared.sync_status.send_modify(|status| status.last_error = None);
    }

    /// Reconcile with the configured remote directory using the configured
    /// connector and wait for the outcome.
    pub async fn sync_now(&self, cancel: &CancellationToken) -> Result<SyncReport, SyncError> {
        let connector = Arc::clone(&self.shared.collaborators.connector);
        self.sync_with(connector, cancel).await
    }

    pub async fn sync_with(
        &self,
        connector: Arc<dyn RemoteConnector>,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let (config, ticket) = self.begin_sync()?;
        self.run_sync(connector, config, ticket, cancel.clone())
            .await
    }

    /// Start a reconciliation in the background. Fails immediately when sync
    /// is unconfigured or already running.
    pub fn start_sync(&self) -> Result<(), SyncError> {
        let (config, ticket) = self.begin_sync()?;
        let frame = self.clone();
        let connector = Arc::clone(&self.shared.collaborators.connector);
        let cancel = self.shared.shutdown.child_token();
        tokio::spawn(async move {
            let _ = frame.run_sync(connector, config, ticket, cancel).await;
        });
        Ok(())
    }

    fn begin_sync(&self) -> Result<(SyncConfig, SyncTicket), SyncError> {
        let config = self
            .shared
            .sync_config
            .clone()
            .ok_or(SyncError::NotConfigured)?;
        if self
            .shared
            .sync_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SyncError::AlreadyRunning);
        }
        self.shared.sync_status.send_modify(|status| {
            status.running = true;
            status.progress = None;
        });
        Ok((
            config,
            SyncTicket {
                shared: Arc::clone(&self.shared),
            },
        ))
    }

    /// Connect and list without the exclusive region, then hold it only
    /// while local files are deleted and downloaded.
    async fn run_sync(
        &self,
        connector: Arc<dyn RemoteConnector>,
        config: SyncConfig,
        ticket: SyncTicket,
        cancel: CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let shared = Arc::clone(&self.shared);
        let opened = tokio::task::spawn_blocking(move || {
            RemoteSession::open(connector.as_ref(), &config, &|step| {
                shared.report_sync(step)
            })
        })
        .await
        .unwrap_or_else(|err| Err(SyncError::Local(join_failed(err))));
        let result = match opened {
            Ok(session) => self.apply_sync(session, cancel).await,
            Err(err) => Err(err),
        };
        sync::finish(&result, &|step| self.shared.report_sync(step));
        if let Err(err) = &result {
            let message = err.to_string();
            self.shared
                .sync_status
                .send_modify(|status| status.last_error = Some(message));
        }
        drop(ticket);
        result
    }

    async fn apply_sync(
        &self,
        mut session: RemoteSession,
        cancel: CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let applied = self
            .exclusive(move |shared, inv| {
                let result = session.apply(&shared.store, &shared.cache, &cancel, &|step| {
                    shared.report_sync(step)
                });
                // Deletions stick even when the run failed later on.
                if let Err(err) = shared.relist(inv) {
                    warn!(error = %err, "failed to relist photos after sync");
                }
                (session, result)
            })
            .await;
        let (session, result) = match applied {
            Ok(applied) => applied,
            Err(err) => return Err(SyncError::Local(join_failed(err))),
        };
        if let Err(err) = tokio::task::spawn_blocking(move || session.close()).await {
            warn!(error = %err, "sync: closing the session failed");
        }
        result
    }

    /// Run `op` on a blocking thread while holding the exclusive region.
    ///
    /// The region stays held until `op` returns even if the caller stops
    /// waiting.
    async fn exclusive<T, F>(&self, op: F) -> Result<T, JoinError>
    where
        T: Send + 'static,
        F: FnOnce(&Shared, &mut Inventory) -> T + Send + 'static,
    {
        let mut guard = Arc::clone(&self.inventory).lock_owned().await;
        let shared = Arc::clone(&self.shared);
        tokio::task::spawn_blocking(move || op(&*shared, &mut *guard)).await
    }
}

impl Shared {
    fn relist(&self, inv: &mut Inventory) -> io::Result<()> {
        let entries = self.store.list()?;
        let mut assets = Vec::with_capacity(entries.len());
        let mut geometry = HashMap::with_capacity(entries.len());
        for entry in entries {
            let orientation = match inv.geometry.get(&entry.name) {
                Some((size, known)) if *size == entry.size_bytes => *known,
                _ => self.read_orientation(&entry.path),
            };
            geometry.insert(entry.name.clone(), (entry.size_bytes, orientation));
            assets.push(PhotoAsset {
                name: entry.name,
                size_bytes: entry.size_bytes,
                path: entry.path,
                orientation,
            });
        }
        inv.geometry = geometry;
        inv.assets = assets;
        self.listing
            .send_replace(inv.assets.iter().map(|a| a.name.clone()).collect());
        self.reshuffle(inv);
        Ok(())
    }

    fn reshuffle(&self, inv: &mut Inventory) {
        let history = self.cache.history();
        let sequence = selector::select(
            &inv.assets,
            inv.target,
            &history,
            self.display_config.recency_window_days,
            now_ms(),
            &mut inv.rng,
        );
        debug!(
            photos = inv.assets.len(),
            selected = sequence.len(),
            orientation = %inv.target,
            "display sequence recomputed"
        );
        inv.playlist.replace(sequence.clone());
        self.sequence.send_replace(sequence);
    }

    fn read_orientation(&self, path: &Path) -> Option<Orientation> {
        match self.collaborators.reader.read(path) {
            Ok(meta) => meta.orientation(),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "dimensions unavailable");
                None
            }
        }
    }

    /// Details with the cached place, plus a newly resolved place when none
    /// was cached yet.
    fn describe(&self, name: &str) -> (PhotoDetails, Option<String>) {
        let metadata = match self.collaborators.reader.read(&self.store.path_of(name)) {
            Ok(meta) => Some(meta),
            Err(err) => {
                debug!(name, error = %err, "metadata unavailable");
                None
            }
        };
        let cached = self.cache.location(name);
        let resolved = match cached {
            Some(_) => None,
            None => location::resolve(
                self.collaborators.resolver.as_ref(),
                name,
                metadata.as_ref(),
            ),
        };
        let details = PhotoDetails {
            name: name.to_string(),
            location: cached,
            capture_year: metadata.and_then(|m| m.capture_year()),
        };
        (details, resolved)
    }

    fn report_sync(&self, step: SyncProgress) {
        debug!(progress = %step, "sync progress");
        self.sync_status
            .send_modify(|status| status.progress = Some(step));
    }
}

/// Marks a reconciliation as running until dropped.
struct SyncTicket {
    shared: Arc<Shared>,
}

impl Drop for SyncTicket {
    fn drop(&mut self) {
        self.shared
            .sync_status
            .send_modify(|status| status.running = false);
        self.shared.sync_running.store(false, Ordering::Release);
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn join_failed(err: JoinError) -> io::Error {
    io::Error::other(format!("blocking task failed: {err}"))
}

fn flatten<T>(result: Result<io::Result<T>, JoinError>) -> io::Result<T> {
    result.unwrap_or_else(|err| Err(join_failed(err)))
}

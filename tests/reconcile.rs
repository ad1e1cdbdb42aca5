use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

use photo_frame_agent::cache::MetadataCache;
use photo_frame_agent::config::{Configuration, SyncConfig};
use photo_frame_agent::error::SyncError;
use photo_frame_agent::events::SyncProgress;
use photo_frame_agent::frame::{Collaborators, Frame};
use photo_frame_agent::store::{PhotoStore, RemoveOutcome};
use photo_frame_agent::sync::{self, RemoteConnector, RemoteDirectory, RemoteEntry};
use tempfile::{TempDir, tempdir};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct FakeRemote {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    /// Downloads of this name fail after writing a few bytes.
    broken: Mutex<Option<String>>,
    downloads: AtomicUsize,
    closes: AtomicUsize,
}

impl FakeRemote {
    fn with(files: &[(&str, &[u8])]) -> Arc<Self> {
        let remote = Self::default();
        {
            let mut map = remote.files.lock().unwrap();
            for (name, body) in files {
                map.insert(name.to_string(), body.to_vec());
            }
        }
        Arc::new(remote)
    }

    fn put(&self, name: &str, body: &[u8]) {
        self.files.lock().unwrap().insert(name.to_string(), body.to_vec());
    }

    fn break_download(&self, name: &str) {
        *self.broken.lock().unwrap() = Some(name.to_string());
    }
}

struct Session(Arc<FakeRemote>);

impl RemoteDirectory for Session {
    fn list(&mut self) -> Result<Vec<RemoteEntry>, SyncError> {
        Ok(self
            .0
            .files
            .lock()
            .unwrap()
            .iter()
            .map(|(name, body)| RemoteEntry {
                name: name.clone(),
                size_bytes: body.len() as u64,
            })
            .collect())
    }

    fn download(&mut self, name: &str, out: &mut dyn Write) -> Result<u64, SyncError> {
        self.0.downloads.fetch_add(1, Ordering::SeqCst);
        if self.0.broken.lock().unwrap().as_deref() == Some(name) {
            out.write_all(b"par")?;
            return Err(SyncError::Transfer {
                name: name.to_string(),
                detail: "connection reset".to_string(),
            });
        }
        let body = self.0.files.lock().unwrap().get(name).cloned().unwrap_or_default();
        out.write_all(&body)?;
        Ok(body.len() as u64)
    }

    fn close(&mut self) {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
    }
}

struct Connector(Arc<FakeRemote>);

impl RemoteConnector for Connector {
    fn connect(&self, _config: &SyncConfig) -> Result<Box<dyn RemoteDirectory>, SyncError> {
        Ok(Box::new(Session(Arc::clone(&self.0))))
    }
}

struct Unreachable;

impl RemoteConnector for Unreachable {
    fn connect(&self, config: &SyncConfig) -> Result<Box<dyn RemoteDirectory>, SyncError> {
        Err(SyncError::Connect {
            address: config.address(),
            detail: "connection refused".to_string(),
        })
    }
}

/// Blocks in `connect` until the test releases it.
struct Gate {
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
    remote: Arc<FakeRemote>,
}

impl RemoteConnector for Gate {
    fn connect(&self, _config: &SyncConfig) -> Result<Box<dyn RemoteDirectory>, SyncError> {
        let _ = self.entered.lock().unwrap().send(());
        let _ = self.release.lock().unwrap().recv();
        Ok(Box::new(Session(Arc::clone(&self.remote))))
    }
}

fn sync_config() -> SyncConfig {
    serde_yaml::from_str("host: ftp.test\npath: /photos").unwrap()
}

struct Fixture {
    _tmp: TempDir,
    lib: PathBuf,
    store: PhotoStore,
    cache: MetadataCache,
}

impl Fixture {
    fn new(local: &[(&str, &[u8])]) -> Self {
        let tmp = tempdir().unwrap();
        let lib = tmp.path().join("photos");
        let store = PhotoStore::open(&lib).unwrap();
        for (name, body) in local {
            fs::write(lib.join(name), body).unwrap();
        }
        Self {
            _tmp: tmp,
            lib,
            store,
            cache: MetadataCache::in_memory(),
        }
    }

    fn run(&self, remote: &Arc<FakeRemote>) -> Result<sync::SyncReport, SyncError> {
        self.run_with(remote, &CancellationToken::new())
    }

    fn run_with(
        &self,
        remote: &Arc<FakeRemote>,
        cancel: &CancellationToken,
    ) -> Result<sync::SyncReport, SyncError> {
        sync::run(
            &Connector(Arc::clone(remote)),
            &sync_config(),
            &self.store,
            &self.cache,
            cancel,
            &|_| {},
        )
    }

    fn hidden_files(&self) -> Vec<String> {
        fs::read_dir(&self.lib)
            .unwrap()
            .filter_map(|e| e.ok()?.file_name().into_string().ok())
            .filter(|name| name.starts_with('.'))
            .collect()
    }
}

#[test]
fn mirrors_remote_and_is_idempotent() {
    let fx = Fixture::new(&[("keep.jpg", b"same"), ("stale.jpg", b"old"), ("readme.txt", b"x")]);
    fx.cache.insert_location("stale.jpg", "Rome, Italy");
    fx.cache.record_shown("stale.jpg", 10);
    let remote = FakeRemote::with(&[
        ("keep.jpg", b"same"),
        ("new.png", b"fresh bytes"),
        ("notes.txt", b"not a photo"),
    ]);

    let report = fx.run(&remote).unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(report.downloaded, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.remote_total, 2);
    assert_eq!(fx.store.names().unwrap(), vec!["keep.jpg", "new.png"]);
    assert_eq!(fs::read(fx.lib.join("new.png")).unwrap(), b"fresh bytes");
    // Non-image files are left alone.
    assert!(fx.lib.join("readme.txt").exists());
    assert!(!fx.lib.join("notes.txt").exists());
    assert_eq!(fx.cache.location("stale.jpg"), None);
    assert_eq!(fx.cache.last_shown("stale.jpg"), None);

    let again = fx.run(&remote).unwrap();
    assert_eq!((again.deleted, again.downloaded, again.skipped), (0, 0, 2));
    assert_eq!(remote.downloads.load(Ordering::SeqCst), 1);
    assert_eq!(remote.closes.load(Ordering::SeqCst), 2);
}

#[test]
fn size_change_redownloads_and_drops_location() {
    let fx = Fixture::new(&[("a.jpg", b"v1")]);
    fx.cache.insert_location("a.jpg", "Rome, Italy");
    fx.cache.record_shown("a.jpg", 10);
    let remote = FakeRemote::with(&[("a.jpg", b"version two")]);

    let report = fx.run(&remote).unwrap();
    assert_eq!(report.downloaded, 1);
    assert_eq!(fs::read(fx.lib.join("a.jpg")).unwrap(), b"version two");
    assert_eq!(fx.cache.location("a.jpg"), None);
    assert_eq!(fx.cache.last_shown("a.jpg"), Some(10));
}

#[test]
fn failed_download_keeps_deletions_and_leaves_no_partial() {
    let fx = Fixture::new(&[("gone.jpg", b"x"), ("b.jpg", b"old")]);
    let remote = FakeRemote::with(&[("a.jpg", b"aaaa"), ("b.jpg", b"bbbbbb")]);
    remote.break_download("b.jpg");

    let err = fx.run(&remote).unwrap_err();
    assert!(matches!(err, SyncError::Transfer { ref name, .. } if name == "b.jpg"));
    assert!(!fx.lib.join("gone.jpg").exists());
    assert_eq!(fs::read(fx.lib.join("a.jpg")).unwrap(), b"aaaa");
    // The old copy survives a failed replacement.
    assert_eq!(fs::read(fx.lib.join("b.jpg")).unwrap(), b"old");
    assert!(fx.hidden_files().is_empty());
    assert_eq!(remote.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn connect_failure_reports_progress() {
    let fx = Fixture::new(&[("a.jpg", b"x")]);
    let seen = Mutex::new(Vec::new());
    let err = sync::run(
        &Unreachable,
        &sync_config(),
        &fx.store,
        &fx.cache,
        &CancellationToken::new(),
        &|step| seen.lock().unwrap().push(step),
    )
    .unwrap_err();
    assert!(matches!(err, SyncError::Connect { .. }));
    assert!(fx.lib.join("a.jpg").exists());
    let seen = seen.into_inner().unwrap();
    assert_eq!(seen.first(), Some(&SyncProgress::Connecting));
    assert!(matches!(seen.last(), Some(SyncProgress::Failed(_))));
}

#[test]
fn cancelled_run_stops_before_touching_files() {
    let fx = Fixture::new(&[("local.jpg", b"x")]);
    let remote = FakeRemote::with(&[("remote.jpg", b"y")]);
    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(matches!(fx.run_with(&remote, &cancel), Err(SyncError::Cancelled)));
    assert!(fx.lib.join("local.jpg").exists());
    assert!(!fx.lib.join("remote.jpg").exists());
    assert_eq!(remote.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn empty_remote_clears_the_store() {
    let fx = Fixture::new(&[("a.jpg", b"x"), ("b.png", b"y")]);
    let remote = FakeRemote::with(&[]);
    let report = fx.run(&remote).unwrap();
    assert_eq!(report.deleted, 2);
    assert!(fx.store.names().unwrap().is_empty());

    remote.put("c.jpg", b"zz");
    assert_eq!(fx.run(&remote).unwrap().downloaded, 1);
}

fn frame_with(lib: &std::path::Path, sync: Option<SyncConfig>, connector: Arc<dyn RemoteConnector>) -> Frame {
    let cfg = Configuration {
        photo_library_path: lib.to_path_buf(),
        sync,
        startup_shuffle_seed: Some(1),
        ..Configuration::default()
    };
    let mut collaborators = Collaborators::headless(&cfg.display);
    collaborators.connector = connector;
    Frame::new(
        &cfg,
        PhotoStore::open(lib).unwrap(),
        Arc::new(MetadataCache::in_memory()),
        collaborators,
    )
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn frame_sync_updates_listing_and_error_state() {
    let tmp = tempdir().unwrap();
    let lib = tmp.path().join("photos");
    let remote = FakeRemote::with(&[("a.jpg", b"aaa")]);
    let frame = frame_with(&lib, Some(sync_config()), Arc::new(Connector(Arc::clone(&remote))));
    let cancel = CancellationToken::new();

    let report = frame.sync_now(&cancel).await.unwrap();
    assert_eq!(report.downloaded, 1);
    assert_eq!(frame.list_files(), vec!["a.jpg"]);
    assert_eq!(frame.display_sequence().len(), 1);
    let status = frame.sync_status();
    assert!(!status.running);
    assert_eq!(status.progress, Some(SyncProgress::Complete));
    assert_eq!(status.state(), "idle");

    let err = frame.sync_with(Arc::new(Unreachable), &cancel).await.unwrap_err();
    assert!(matches!(err, SyncError::Connect { .. }));
    assert_eq!(frame.sync_status().state(), "failed");
    assert!(frame.last_sync_error().unwrap().contains("connection refused"));
    // Local files are untouched by a failed connect.
    assert_eq!(frame.list_files(), vec!["a.jpg"]);

    frame.clear_sync_error();
    assert_eq!(frame.last_sync_error(), None);
    assert_eq!(frame.sync_status().state(), "idle");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unconfigured_frame_refuses_to_sync() {
    let tmp = tempdir().unwrap();
    let frame = frame_with(&tmp.path().join("photos"), None, Arc::new(Unreachable));
    assert!(matches!(
        frame.sync_now(&CancellationToken::new()).await,
        Err(SyncError::NotConfigured)
    ));
    assert!(matches!(frame.start_sync(), Err(SyncError::NotConfigured)));
    assert_eq!(frame.last_sync_error(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_sync_is_rejected_while_one_runs() {
    let tmp = tempdir().unwrap();
    let remote = FakeRemote::with(&[("a.jpg", b"aaa")]);
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gate = Gate {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
        remote: Arc::clone(&remote),
    };
    let frame = frame_with(&tmp.path().join("photos"), Some(sync_config()), Arc::new(gate));

    frame.start_sync().unwrap();
    tokio::task::spawn_blocking(move || entered_rx.recv_timeout(Duration::from_secs(5)))
        .await
        .unwrap()
        .expect("background sync reached connect");
    assert!(frame.sync_status().running);
    assert!(matches!(frame.start_sync(), Err(SyncError::AlreadyRunning)));
    assert!(matches!(
        frame.sync_with(Arc::new(Unreachable), &CancellationToken::new()).await,
        Err(SyncError::AlreadyRunning)
    ));

    let mut status = frame.subscribe_sync();
    release_tx.send(()).unwrap();
    timeout(Duration::from_secs(5), status.wait_for(|s| !s.running))
        .await
        .expect("sync finished")
        .unwrap();
    assert_eq!(frame.list_files(), vec!["a.jpg"]);
    assert_eq!(frame.last_sync_error(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn frame_stays_usable_while_sync_connects() {
    let tmp = tempdir().unwrap();
    let lib = tmp.path().join("photos");
    fs::create_dir_all(&lib).unwrap();
    fs::write(lib.join("local.jpg"), b"local").unwrap();
    let remote = FakeRemote::with(&[("a.jpg", b"aaa")]);
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gate = Gate {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
        remote: Arc::clone(&remote),
    };
    let frame = frame_with(&lib, Some(sync_config()), Arc::new(gate));

    frame.start_sync().unwrap();
    tokio::task::spawn_blocking(move || entered_rx.recv_timeout(Duration::from_secs(5)))
        .await
        .unwrap()
        .expect("background sync reached connect");

    let next = timeout(Duration::from_secs(2), frame.next_photo())
        .await
        .expect("next photo while the server is slow");
    assert_eq!(next.map(|p| p.name).as_deref(), Some("local.jpg"));
    let missing = timeout(Duration::from_secs(2), frame.delete_file("zzz.jpg"))
        .await
        .expect("delete while the server is slow")
        .unwrap();
    assert_eq!(missing, RemoveOutcome::Missing);
    assert!(
        timeout(Duration::from_secs(2), frame.on_photo_shown("local.jpg"))
            .await
            .expect("history while the server is slow")
    );
    assert!(frame.sync_status().running);

    let mut status = frame.subscribe_sync();
    release_tx.send(()).unwrap();
    timeout(Duration::from_secs(5), status.wait_for(|s| !s.running))
        .await
        .expect("sync finished")
        .unwrap();
    assert_eq!(frame.list_files(), vec!["a.jpg"]);
    assert_eq!(remote.closes.load(Ordering::SeqCst), 1);
}

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use tracing::warn;

pub use config_model::{
    DisplayConfig, OrientationPreference, QuietHoursConfig, ScreenGeometry, SyncConfig,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ControlConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    /// Longest accepted command line, excluding the newline.
    pub max_line_bytes: usize,
}

impl ControlConfig {
    const DEFAULT_PORT: u16 = 4000;
    const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;
    const MIN_LINE_BYTES: usize = 1024;

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: Self::DEFAULT_PORT,
            max_line_bytes: Self::DEFAULT_MAX_LINE_BYTES,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Configuration {
    /// Flat directory holding the displayed photos.
    pub photo_library_path: PathBuf,
    /// SQLite file for the location and history tables. Defaults to a file
    /// next to the library directory.
    pub cache_path: Option<PathBuf>,
    pub control: ControlConfig,
    pub display: DisplayConfig,
    /// Remote directory to mirror; sync commands fail when unset.
    pub sync: Option<SyncConfig>,
    /// Optional deterministic seed for the shuffle.
    pub startup_shuffle_seed: Option<u64>,
}

impl Configuration {
    const DEFAULT_CACHE_FILE: &'static str = "photo-frame-cache.sqlite";

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            !self.photo_library_path.as_os_str().is_empty(),
            "photo-library-path must be set"
        );
        ensure!(self.control.port > 0, "control.port must be greater than zero");
        ensure!(
            self.control.max_line_bytes >= ControlConfig::MIN_LINE_BYTES,
            "control.max-line-bytes must be at least {}",
            ControlConfig::MIN_LINE_BYTES
        );
        ensure!(
            !self.cache_path().starts_with(&self.photo_library_path),
            "cache-path must live outside photo-library-path"
        );
        self.display
            .validate()
            .context("invalid display configuration")?;
        if let Some(sync) = &self.sync {
            sync.validate().context("invalid sync configuration")?;
        }
        if self.display.quiet_hours.window().is_none() {
            warn!(
                start = %self.display.quiet_hours.start,
                end = %self.display.quiet_hours.end,
                "quiet hours are not valid HH:MM times; quiet hours disabled"
            );
        }
        Ok(self)
    }

    pub fn cache_path(&self) -> PathBuf {
        if let Some(path) = &self.cache_path {
            return path.clone();
        }
        match self.photo_library_path.parent() {
            Some(parent) => parent.join(Self::DEFAULT_CACHE_FILE),
            None => PathBuf::from(Self::DEFAULT_CACHE_FILE),
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            photo_library_path: PathBuf::new(),
            cache_path: None,
            control: ControlConfig::default(),
            display: DisplayConfig::default(),
            sync: None,
            startup_shuffle_seed: None,
        }
    }
}

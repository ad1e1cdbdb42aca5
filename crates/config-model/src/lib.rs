use std::fmt;
use std::time::Duration;

use anyhow::{Result, ensure};
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;

pub use display::{DisplayConfig, OrientationPreference, ScreenGeometry};
pub use quiet::{QuietHoursConfig, QuietWindow, is_quiet, parse_clock};
pub use sync::SyncConfig;

mod quiet {
    use super::*;

    /// Do-not-disturb window expressed as two local `HH:MM` clock times.
    ///
    /// The raw strings are kept as configured. Values that fail to parse are
    /// not rejected; the window simply never reports quiet.
    #[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
    #[serde(rename_all = "kebab-case")]
    pub struct QuietHoursConfig {
        #[serde(default = "QuietHoursConfig::default_start")]
        pub start: String,
        #[serde(default = "QuietHoursConfig::default_end")]
        pub end: String,
    }

    impl QuietHoursConfig {
        fn default_start() -> String {
            "22:00".to_string()
        }

        fn default_end() -> String {
            "07:00".to_string()
        }

        pub fn window(&self) -> Option<QuietWindow> {
            Some(QuietWindow {
                start: parse_clock(&self.start)?,
                end: parse_clock(&self.end)?,
            })
        }

        pub fn is_quiet_at(&self, now: NaiveTime) -> bool {
            is_quiet(now, &self.start, &self.end)
        }
    }

    impl Default for QuietHoursConfig {
        fn default() -> Self {
            Self {
                start: Self::default_start(),
                end: Self::default_end(),
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QuietWindow {
        pub start: NaiveTime,
        pub end: NaiveTime,
    }

    impl QuietWindow {
        /// `start < end` is a same-day window; anything else wraps midnight.
        pub fn contains(&self, now: NaiveTime) -> bool {
            if self.start < self.end {
                self.start <= now && now < self.end
            } else {
                now >= self.start || now < self.end
            }
        }
    }

    pub fn parse_clock(raw: &str) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
    }

    /// Unparseable bounds never report quiet.
    pub fn is_quiet(now: NaiveTime, start: &str, end: &str) -> bool {
        match (parse_clock(start), parse_clock(end)) {
            (Some(start), Some(end)) => QuietWindow { start, end }.contains(now),
            _ => false,
        }
    }
}

mod display {
    use super::*;

    #[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
    #[serde(rename_all = "kebab-case")]
    pub enum OrientationPreference {
        /// Follow the geometry reported by the display host.
        #[default]
        Auto,
        Landscape,
        Portrait,
    }

    #[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
    #[serde(rename_all = "kebab-case")]
    pub struct ScreenGeometry {
        pub width: u32,
        pub height: u32,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "kebab-case", default)]
    pub struct DisplayConfig {
        pub quiet_hours: QuietHoursConfig,
        /// Timezone for quiet-hours evaluation; host local time when unset.
        pub timezone: Option<Tz>,
        /// Days a shown photo stays out of the fresh candidate pool.
        pub recency_window_days: u32,
        #[serde(with = "humantime_serde")]
        pub photo_duration: Duration,
        pub orientation: OrientationPreference,
        /// Geometry reported when no display host is attached.
        pub screen: Option<ScreenGeometry>,
    }

    impl DisplayConfig {
        const DEFAULT_RECENCY_WINDOW_DAYS: u32 = 30;
        const DEFAULT_PHOTO_DURATION: Duration = Duration::from_secs(5);

        pub fn validate(&self) -> Result<()> {
            ensure!(
                !self.photo_duration.is_zero(),
                "display.photo-duration must be greater than zero"
            );
            if let Some(screen) = self.screen {
                ensure!(
                    screen.width > 0 && screen.height > 0,
                    "display.screen dimensions must be positive"
                );
            }
            Ok(())
        }

        pub fn local_clock(&self, instant: DateTime<Utc>) -> NaiveTime {
            match self.timezone {
                Some(tz) => instant.with_timezone(&tz).time(),
                None => instant.with_timezone(&chrono::Local).time(),
            }
        }

        pub fn is_quiet_at(&self, instant: DateTime<Utc>) -> bool {
            self.quiet_hours.is_quiet_at(self.local_clock(instant))
        }

        pub fn recency_window_ms(&self) -> i64 {
            i64::from(self.recency_window_days) * 86_400_000
        }
    }

    impl Default for DisplayConfig {
        fn default() -> Self {
            Self {
                quiet_hours: QuietHoursConfig::default(),
                timezone: None,
                recency_window_days: Self::DEFAULT_RECENCY_WINDOW_DAYS,
                photo_duration: Self::DEFAULT_PHOTO_DURATION,
                orientation: OrientationPreference::default(),
                screen: None,
            }
        }
    }
}

mod sync {
    use super::*;

    /// Remote FTP directory mirrored into the local photo store.
    #[derive(Clone, Deserialize)]
    #[serde(rename_all = "kebab-case")]
    pub struct SyncConfig {
        pub host: String,
        #[serde(default = "SyncConfig::default_port")]
        pub port: u16,
        #[serde(default = "SyncConfig::default_path")]
        pub path: String,
        #[serde(default)]
        pub username: String,
        #[serde(default)]
        pub password: String,
        #[serde(default, with = "humantime_serde")]
        pub interval: Option<Duration>,
        #[serde(default)]
        pub on_startup: bool,
        /// Bound on connecting and on each read from the server.
        #[serde(default = "SyncConfig::default_timeout", with = "humantime_serde")]
        pub timeout: Duration,
    }

    impl SyncConfig {
        const ANONYMOUS_USER: &'static str = "anonymous";

        fn default_port() -> u16 {
            21
        }

        fn default_path() -> String {
            "/".to_string()
        }

        fn default_timeout() -> Duration {
            Duration::from_secs(30)
        }

        pub fn validate(&self) -> Result<()> {
            ensure!(!self.host.trim().is_empty(), "sync.host must not be blank");
            ensure!(self.port > 0, "sync.port must be greater than zero");
            if let Some(interval) = self.interval {
                ensure!(
                    interval >= Duration::from_secs(60),
                    "sync.interval must be at least one minute"
                );
            }
            ensure!(
                !self.timeout.is_zero(),
                "sync.timeout must be greater than zero"
            );
            Ok(())
        }

        /// Blank usernames log in anonymously with an empty password.
        pub fn credentials(&self) -> (&str, &str) {
            if self.username.trim().is_empty() {
                (Self::ANONYMOUS_USER, "")
            } else {
                (self.username.as_str(), self.password.as_str())
            }
        }

        pub fn address(&self) -> String {
            format!("{}:{}", self.host.trim(), self.port)
        }

        /// Directory to enter after login, if any.
        pub fn remote_dir(&self) -> Option<&str> {
            let path = self.path.trim();
            if path.is_empty() || path == "/" {
                None
            } else {
                Some(path)
            }
        }
    }

    impl fmt::Debug for SyncConfig {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("SyncConfig")
                .field("host", &self.host)
                .field("port", &self.port)
                .field("path", &self.path)
                .field("username", &self.username)
                .field("password", &"<redacted>")
                .field("interval", &self.interval)
                .field("on_startup", &self.on_startup)
                .field("timeout", &self.timeout)
                .finish()
        }
    }
}

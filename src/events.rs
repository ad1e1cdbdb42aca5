use std::fmt;

/// Emitted by the slideshow driver in place of a renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlideEvent {
    Show {
        name: String,
        location: Option<String>,
        capture_year: Option<i32>,
    },
    Sleep,
    Wake,
}

/// Observational reconciliation progress. Carries no control meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncProgress {
    Connecting,
    Listing,
    Deleting(usize),
    Downloading(usize),
    Complete,
    Failed(String),
}

impl fmt::Display for SyncProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Listing => f.write_str("listing"),
            Self::Deleting(n) => write!(f, "deleting {n}"),
            Self::Downloading(n) => write!(f, "downloading {n}"),
            Self::Complete => f.write_str("complete"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Snapshot of the reconciler for status queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub running: bool,
    pub progress: Option<SyncProgress>,
    pub last_error: Option<String>,
}

impl SyncStatus {
    pub fn state(&self) -> &'static str {
        if self.running {
            "running"
        } else if self.last_error.is_some() {
            "failed"
        } else {
            "idle"
        }
    }
}

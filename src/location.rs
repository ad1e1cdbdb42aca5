//! "Where was this taken": reverse geocoding of a photo's GPS position.
//!
//! Caching the answer is up to the caller, which knows whether the file
//! changed while the resolver ran.

use anyhow::Result;
use tracing::warn;

use crate::metadata::{GpsCoords, PhotoMetadata};

/// Reverse geocoding collaborator.
///
/// `Ok(None)` (or an empty string) means the geocoder knows no place for the
/// coordinates. `Err` means the lookup itself failed.
pub trait PlaceResolver: Send + Sync {
    fn resolve(&self, latitude: f64, longitude: f64) -> Result<Option<String>>;
}

/// Resolver used when no geocoder is attached: every lookup yields no place,
/// so the formatted coordinates are shown instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinatesOnly;

impl PlaceResolver for CoordinatesOnly {
    fn resolve(&self, _latitude: f64, _longitude: f64) -> Result<Option<String>> {
        Ok(None)
    }
}

pub fn format_coordinates(gps: GpsCoords) -> String {
    format!("{:.4}, {:.4}", gps.latitude, gps.longitude)
}

/// Place to show for a photo. Photos without GPS have none; an unknown place
/// falls back to the coordinates. A failing resolver yields `None` so nothing
/// gets cached and the next display retries.
pub fn resolve(
    resolver: &dyn PlaceResolver,
    name: &str,
    metadata: Option<&PhotoMetadata>,
) -> Option<String> {
    let gps = metadata?.gps?;
    match resolver.resolve(gps.latitude, gps.longitude) {
        Ok(Some(place)) if !place.trim().is_empty() => Some(place),
        Ok(_) => Some(format_coordinates(gps)),
        Err(err) => {
            warn!(name, error = %err, "reverse geocoding failed; no location available");
            None
        }
    }
}

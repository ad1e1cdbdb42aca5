//! Smart shuffle: decide which photos are eligible and in which order.

use std::collections::HashMap;
use std::path::PathBuf;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::orientation::{self, Orientation};

pub const DAY_MS: i64 = 86_400_000;

/// One photo in the local store, with its orientation resolved when the
/// dimensions could be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoAsset {
    pub name: String,
    pub size_bytes: u64,
    pub path: PathBuf,
    pub orientation: Option<Orientation>,
}

/// Produce a random permutation of the photos that match `target` and were
/// not shown within the recency window.
///
/// Never-shown photos count as shown at epoch 0. When every matching photo
/// is recent the whole oriented set is shuffled instead, so the result is
/// only empty if nothing matches the orientation.
pub fn select<R: Rng + ?Sized>(
    photos: &[PhotoAsset],
    target: Orientation,
    history: &HashMap<String, i64>,
    recency_window_days: u32,
    now_ms: i64,
    rng: &mut R,
) -> Vec<PhotoAsset> {
    let oriented: Vec<&PhotoAsset> = photos
        .iter()
        .filter(|p| orientation::matches(p.orientation, target))
        .collect();
    let threshold = now_ms.saturating_sub(i64::from(recency_window_days).saturating_mul(DAY_MS));

    let mut sequence: Vec<PhotoAsset> = oriented
        .iter()
        .filter(|p| history.get(&p.name).copied().unwrap_or(0) < threshold)
        .map(|p| (*p).clone())
        .collect();
    if sequence.is_empty() {
        sequence = oriented.into_iter().cloned().collect();
    }
    sequence.shuffle(rng);
    sequence
}

/// A computed display sequence replayed front to back before the next
/// recomputation.
#[derive(Debug, Default)]
pub struct Playlist {
    sequence: Vec<PhotoAsset>,
    cursor: usize,
}

impl Playlist {
    pub fn replace(&mut self, sequence: Vec<PhotoAsset>) {
        self.sequence = sequence;
        self.cursor = 0;
    }

    pub fn next(&mut self) -> Option<PhotoAsset> {
        let next = self.sequence.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(next)
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.sequence.len()
    }

    pub fn sequence(&self) -> &[PhotoAsset] {
        &self.sequence
    }

    pub fn remaining(&self) -> usize {
        self.sequence.len().saturating_sub(self.cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    fn asset(name: &str, orientation: Option<Orientation>) -> PhotoAsset {
        PhotoAsset {
            name: name.to_string(),
            size_bytes: 1,
            path: PathBuf::from(name),
            orientation,
        }
    }

    fn names(seq: &[PhotoAsset]) -> Vec<&str> {
        let mut names: Vec<&str> = seq.iter().map(|p| p.name.as_str()).collect();
        names.sort();
        names
    }

    const NOW: i64 = 1_760_000_000_000;

    #[test]
    fn stale_landscape_photo_is_the_only_candidate() {
        let photos = vec![
            asset("a.jpg", Some(Orientation::Landscape)),
            asset("b.jpg", Some(Orientation::Landscape)),
            asset("c.jpg", Some(Orientation::Portrait)),
        ];
        let history = HashMap::from([
            ("a.jpg".to_string(), NOW - 40 * DAY_MS),
            ("b.jpg".to_string(), NOW - DAY_MS),
        ]);
        let mut rng = StdRng::seed_from_u64(7);
        let seq = select(&photos, Orientation::Landscape, &history, 30, NOW, &mut rng);
        assert_eq!(names(&seq), vec!["a.jpg"]);
    }

    #[test]
    fn all_recent_falls_back_to_oriented_set() {
        let photos = vec![
            asset("a.jpg", Some(Orientation::Landscape)),
            asset("b.jpg", Some(Orientation::Landscape)),
            asset("c.jpg", Some(Orientation::Portrait)),
        ];
        let history = HashMap::from([
            ("a.jpg".to_string(), NOW - DAY_MS),
            ("b.jpg".to_string(), NOW),
        ]);
        let mut rng = StdRng::seed_from_u64(1);
        let seq = select(&photos, Orientation::Landscape, &history, 30, NOW, &mut rng);
        assert_eq!(names(&seq), vec!["a.jpg", "b.jpg"]);
    }

    #[test]
    fn never_returns_the_wrong_orientation() {
        let mut photos = Vec::new();
        for i in 0..40 {
            let o = if i % 3 == 0 {
                Orientation::Portrait
            } else {
                Orientation::Landscape
            };
            photos.push(asset(&format!("{i}.jpg"), Some(o)));
        }
        let history = HashMap::new();
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let seq = select(&photos, Orientation::Portrait, &history, 30, NOW, &mut rng);
            assert_eq!(seq.len(), 14);
            assert!(seq.iter().all(|p| p.orientation == Some(Orientation::Portrait)));
        }
    }

    #[test]
    fn unknown_geometry_matches_any_target() {
        let photos = vec![asset("mystery.heic", None), asset("p.jpg", Some(Orientation::Portrait))];
        let mut rng = StdRng::seed_from_u64(3);
        let seq = select(&photos, Orientation::Landscape, &HashMap::new(), 30, NOW, &mut rng);
        assert_eq!(names(&seq), vec!["mystery.heic"]);
    }

    #[test]
    fn window_boundary_is_exclusive() {
        let photos = vec![asset("edge.jpg", Some(Orientation::Landscape)), asset("old.jpg", Some(Orientation::Landscape))];
        let history = HashMap::from([
            ("edge.jpg".to_string(), NOW - 30 * DAY_MS),
            ("old.jpg".to_string(), NOW - 30 * DAY_MS - 1),
        ]);
        let mut rng = StdRng::seed_from_u64(9);
        let seq = select(&photos, Orientation::Landscape, &history, 30, NOW, &mut rng);
        assert_eq!(names(&seq), vec!["old.jpg"]);
    }

    #[test]
    fn playlist_replays_then_reports_exhaustion() {
        let mut playlist = Playlist::default();
        assert!(playlist.is_exhausted());
        playlist.replace(vec![asset("x.jpg", None), asset("y.jpg", None)]);
        assert_eq!(playlist.remaining(), 2);
        assert_eq!(playlist.next().map(|p| p.name), Some("x.jpg".to_string()));
        assert_eq!(playlist.next().map(|p| p.name), Some("y.jpg".to_string()));
        assert!(playlist.next().is_none());
        assert!(playlist.is_exhausted());
    }
}

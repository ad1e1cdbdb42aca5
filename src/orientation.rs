use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    Landscape,
    Portrait,
}

impl Orientation {
    /// Square frames count as landscape.
    pub fn from_geometry(width: u32, height: u32) -> Self {
        if width >= height {
            Self::Landscape
        } else {
            Self::Portrait
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Landscape => "landscape",
            Self::Portrait => "portrait",
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// EXIF orientations 5..=8 are stored transposed (rotated 90° or 270°).
#[inline]
pub fn rotation_swaps_axes(exif_orientation: u16) -> bool {
    matches!(exif_orientation, 5..=8)
}

/// Classify stored pixel dimensions as displayed after EXIF rotation.
/// Returns `None` when either dimension is unknown.
pub fn classify(pixel_width: u32, pixel_height: u32, exif_orientation: u16) -> Option<Orientation> {
    if pixel_width == 0 || pixel_height == 0 {
        return None;
    }
    let (w, h) = if rotation_swaps_axes(exif_orientation) {
        (pixel_height, pixel_width)
    } else {
        (pixel_width, pixel_height)
    };
    Some(Orientation::from_geometry(w, h))
}

/// Photos whose orientation cannot be determined match every target.
pub fn matches(resolved: Option<Orientation>, target: Orientation) -> bool {
    resolved.is_none_or(|o| o == target)
}

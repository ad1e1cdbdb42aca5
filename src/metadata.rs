use std::fs;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use exif::{Exif, In, Tag, Value};

use crate::orientation::{self, Orientation};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsCoords {
    pub latitude: f64,
    pub longitude: f64,
}

/// EXIF-derived facts about one photo. Recomputed on demand, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoMetadata {
    pub gps: Option<GpsCoords>,
    pub capture_date: Option<NaiveDateTime>,
    pub pixel_width: u32,
    pub pixel_height: u32,
    /// Raw EXIF orientation tag (1 when absent).
    pub rotation: u16,
}

impl Default for PhotoMetadata {
    fn default() -> Self {
        Self {
            gps: None,
            capture_date: None,
            pixel_width: 0,
            pixel_height: 0,
            rotation: 1,
        }
    }
}

impl PhotoMetadata {
    pub fn orientation(&self) -> Option<Orientation> {
        orientation::classify(self.pixel_width, self.pixel_height, self.rotation)
    }

    pub fn capture_year(&self) -> Option<i32> {
        self.capture_date.map(|d| d.year())
    }
}

pub trait MetadataReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<PhotoMetadata>;
}

/// Reads tags with `kamadak-exif`, falling back to the image header for
/// dimensions when EXIF does not carry them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExifMetadataReader;

impl MetadataReader for ExifMetadataReader {
    fn read(&self, path: &Path) -> Result<PhotoMetadata> {
        let file =
            fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut buf = BufReader::new(file);
        // Missing or unreadable EXIF is normal (PNG, stripped JPEGs).
        let exif = exif::Reader::new().read_from_container(&mut buf).ok();

        let mut meta = PhotoMetadata::default();
        if let Some(exif) = &exif {
            meta.rotation = read_uint(exif, Tag::Orientation)
                .and_then(|v| u16::try_from(v).ok())
                .unwrap_or(1);
            let (w, h) = exif_dimensions(exif);
            meta.pixel_width = w;
            meta.pixel_height = h;
            meta.gps = read_gps(exif);
            meta.capture_date =
                read_datetime(exif, Tag::DateTimeOriginal).or_else(|| read_datetime(exif, Tag::DateTime));
        }

        if meta.pixel_width == 0 || meta.pixel_height == 0 {
            if let Ok((w, h)) = image::image_dimensions(path) {
                meta.pixel_width = w;
                meta.pixel_height = h;
            }
        }
        Ok(meta)
    }
}

fn read_uint(exif: &Exif, tag: Tag) -> Option<u32> {
    exif.get_field(tag, In::PRIMARY)?.value.get_uint(0)
}

fn exif_dimensions(exif: &Exif) -> (u32, u32) {
    let width = read_uint(exif, Tag::PixelXDimension)
        .or_else(|| read_uint(exif, Tag::ImageWidth))
        .unwrap_or(0);
    let height = read_uint(exif, Tag::PixelYDimension)
        .or_else(|| read_uint(exif, Tag::ImageLength))
        .unwrap_or(0);
    (width, height)
}

fn read_gps(exif: &Exif) -> Option<GpsCoords> {
    let latitude = read_coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, b'S')?;
    let longitude = read_coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, b'W')?;
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return None;
    }
    Some(GpsCoords {
        latitude,
        longitude,
    })
}

/// Degrees/minutes/seconds rationals to signed decimal degrees.
fn read_coordinate(exif: &Exif, value_tag: Tag, ref_tag: Tag, negative_ref: u8) -> Option<f64> {
    let field = exif.get_field(value_tag, In::PRIMARY)?;
    let Value::Rational(parts) = &field.value else {
        return None;
    };
    let mut decimal = 0.0;
    for (part, scale) in parts.iter().zip([1.0, 60.0, 3600.0]) {
        if part.denom == 0 {
            return None;
        }
        decimal += part.to_f64() / scale;
    }
    let negative = exif
        .get_field(ref_tag, In::PRIMARY)
        .and_then(|f| match &f.value {
            Value::Ascii(values) => values.first().and_then(|v| v.first().copied()),
            _ => None,
        })
        .is_some_and(|r| r.eq_ignore_ascii_case(&negative_ref));
    Some(if negative { -decimal } else { decimal })
}

fn read_datetime(exif: &Exif, tag: Tag) -> Option<NaiveDateTime> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let Value::Ascii(values) = &field.value else {
        return None;
    };
    let dt = exif::DateTime::from_ascii(values.first()?).ok()?;
    NaiveDate::from_ymd_opt(i32::from(dt.year), u32::from(dt.month), u32::from(dt.day))?
        .and_hms_opt(
            u32::from(dt.hour),
            u32::from(dt.minute),
            u32::from(dt.second),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn non_image_yields_unknown_geometry() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("fake.jpg");
        fs::write(&path, b"not really a jpeg").unwrap();
        let meta = ExifMetadataReader.read(&path).unwrap();
        assert_eq!(meta.orientation(), None);
        assert_eq!(meta.gps, None);
        assert_eq!(meta.capture_year(), None);
    }

    #[test]
    fn missing_file_is_an_error() {
        let tmp = tempdir().unwrap();
        assert!(ExifMetadataReader.read(&tmp.path().join("nope.jpg")).is_err());
    }

    #[test]
    fn capture_year_comes_from_date() {
        let meta = PhotoMetadata {
            capture_date: NaiveDate::from_ymd_opt(2019, 7, 4).and_then(|d| d.and_hms_opt(12, 0, 0)),
            pixel_width: 3000,
            pixel_height: 4000,
            rotation: 1,
            ..PhotoMetadata::default()
        };
        assert_eq!(meta.capture_year(), Some(2019));
        assert_eq!(meta.orientation(), Some(Orientation::Portrait));
    }
}

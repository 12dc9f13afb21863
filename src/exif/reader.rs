use anyhow::{Context, Result};
use ::exif::{Exif, In, Reader, Tag, Value};
use serde::Serialize;
use std::io::BufReader;
use std::path::Path;

use crate::geo::{Coordinate, Reference, decode_dms};

/// Geotag fields and the few descriptive fields shown next to them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Geotag {
    pub position: Option<Coordinate>,
    /// The point the camera was facing (`GPSDestLatitude`/`GPSDestLongitude`).
    pub destination: Option<Coordinate>,
    pub model: Option<String>,
    pub date_time_original: Option<String>,
}

/// Source of geotags for the catalog. Implemented by [`ExifGeotagReader`];
/// tests substitute their own.
pub trait GeotagReader {
    fn read_geotag(&self, path: &Path) -> Result<Geotag>;
}

/// Reads geotags from the EXIF block of an image file.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExifGeotagReader;

impl GeotagReader for ExifGeotagReader {
    fn read_geotag(&self, path: &Path) -> Result<Geotag> {
        read_geotag(path)
    }
}

/// Read the geotag of an image file.
///
/// A well-formed image without any EXIF block yields an empty [`Geotag`];
/// a file whose container or EXIF cannot be parsed is an error.
pub fn read_geotag(path: &Path) -> Result<Geotag> {
    let file = std::fs::File::open(path).context("Failed to open image file")?;
    let mut reader = BufReader::new(&file);

    let exif = match Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(::exif::Error::NotFound(_)) => {
            log::debug!("No EXIF data found in {}", path.display());
            return Ok(Geotag::default());
        }
        Err(e) => return Err(e).context("Failed to parse EXIF"),
    };

    let position = read_point(
        &exif,
        (Tag::GPSLatitude, Tag::GPSLatitudeRef),
        (Tag::GPSLongitude, Tag::GPSLongitudeRef),
    );

    // Read independently of the position; a half-written pair reads as none.
    let destination = read_point(
        &exif,
        (Tag::GPSDestLatitude, Tag::GPSDestLatitudeRef),
        (Tag::GPSDestLongitude, Tag::GPSDestLongitudeRef),
    );

    Ok(Geotag {
        position,
        destination,
        model: ascii_field(&exif, Tag::Model),
        date_time_original: ascii_field(&exif, Tag::DateTimeOriginal),
    })
}

fn read_point(exif: &Exif, lat: (Tag, Tag), lon: (Tag, Tag)) -> Option<Coordinate> {
    let latitude = read_axis(exif, lat.0, lat.1)?;
    let longitude = read_axis(exif, lon.0, lon.1)?;
    Some(Coordinate::new(latitude, longitude))
}

/// Decode one GPS rational triple plus its hemisphere reference.
fn read_axis(exif: &Exif, value_tag: Tag, ref_tag: Tag) -> Option<f64> {
    let field = exif.get_field(value_tag, In::PRIMARY)?;
    let (deg, min, sec) = match field.value {
        Value::Rational(ref v) if v.len() >= 3 => (v[0].to_f64(), v[1].to_f64(), v[2].to_f64()),
        Value::SRational(ref v) if v.len() >= 3 => (v[0].to_f64(), v[1].to_f64(), v[2].to_f64()),
        _ => {
            log::debug!("Unexpected value for {value_tag}: {:?}", field.value);
            return None;
        }
    };
    if !(deg.is_finite() && min.is_finite() && sec.is_finite()) {
        return None;
    }

    let reference = ascii_field(exif, ref_tag).and_then(|r| Reference::parse(&r));
    Some(decode_dms(deg, min, sec, reference))
}

fn ascii_field(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match field.value {
        Value::Ascii(ref parts) => {
            let s = parts
                .first()
                .map(|bytes| String::from_utf8_lossy(bytes).trim_matches(['\0', ' ']).to_string())?;
            if s.is_empty() { None } else { Some(s) }
        }
        _ => None,
    }
}

//! Coordinate math: decimal ↔ degree/minute/second conversion with hemisphere
//! references, and the initial great-circle bearing between two points.

use serde::{Deserialize, Serialize};

/// A WGS84 point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

impl std::str::FromStr for Coordinate {
    type Err = anyhow::Error;

    /// Parse `"lat,lon"` (whitespace around either number is allowed).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lat, lon) = s
            .split_once(',')
            .ok_or_else(|| anyhow::anyhow!("expected LAT,LON but got {s:?}"))?;
        let latitude: f64 = lat.trim().parse()?;
        let longitude: f64 = lon.trim().parse()?;
        if !(-90.0..=90.0).contains(&latitude) {
            anyhow::bail!("latitude {latitude} is outside -90..90");
        }
        if !(-180.0..=180.0).contains(&longitude) {
            anyhow::bail!("longitude {longitude} is outside -180..180");
        }
        Ok(Self::new(latitude, longitude))
    }
}

/// Which component of a coordinate a DMS value encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Latitude,
    Longitude,
}

/// Hemisphere reference stored next to a GPS rational triple (`GPSLatitudeRef` etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reference {
    North,
    South,
    East,
    West,
}

impl Reference {
    pub fn as_char(self) -> char {
        match self {
            Self::North => 'N',
            Self::South => 'S',
            Self::East => 'E',
            Self::West => 'W',
        }
    }

    /// Parse a reference tag value; only the first non-blank character counts.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().chars().next()?.to_ascii_uppercase() {
            'N' => Some(Self::North),
            'S' => Some(Self::South),
            'E' => Some(Self::East),
            'W' => Some(Self::West),
            _ => None,
        }
    }

    fn is_negative(self) -> bool {
        matches!(self, Self::South | Self::West)
    }
}

/// Degrees, minutes and seconds plus the hemisphere, as written to EXIF.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dms {
    pub degrees: u32,
    pub minutes: u32,
    /// Rounded to 6 decimals.
    pub seconds: f64,
    pub reference: Reference,
}

impl Dms {
    /// Split a signed decimal value into DMS with the matching hemisphere.
    pub fn from_decimal(value: f64, axis: Axis) -> Self {
        let reference = match (axis, value < 0.0) {
            (Axis::Latitude, false) => Reference::North,
            (Axis::Latitude, true) => Reference::South,
            (Axis::Longitude, false) => Reference::East,
            (Axis::Longitude, true) => Reference::West,
        };

        let abs = value.abs();
        let mut degrees = abs.trunc() as u32;
        let total_minutes = (abs - degrees as f64) * 60.0;
        let mut minutes = total_minutes.trunc() as u32;
        let mut seconds = round_to((total_minutes - minutes as f64) * 60.0, 6);

        // Rounding can push 59.9999999 up to a full minute.
        if seconds >= 60.0 {
            seconds -= 60.0;
            minutes += 1;
        }
        if minutes >= 60 {
            minutes -= 60;
            degrees += 1;
        }

        Self {
            degrees,
            minutes,
            seconds,
            reference,
        }
    }

    pub fn to_decimal(&self) -> f64 {
        decode_dms(
            self.degrees as f64,
            self.minutes as f64,
            self.seconds,
            Some(self.reference),
        )
    }
}

/// `deg + min/60 + sec/3600`, negated for a South or West reference.
pub fn decode_dms(degrees: f64, minutes: f64, seconds: f64, reference: Option<Reference>) -> f64 {
    let value = degrees + minutes / 60.0 + seconds / 3600.0;
    match reference {
        Some(r) if r.is_negative() => -value,
        _ => value,
    }
}

/// Initial compass bearing from `from` to `to` (forward azimuth), in `[0, 360)`.
pub fn bearing(from: Coordinate, to: Coordinate) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let d_lon = (to.longitude - from.longitude).to_radians();

    let x = d_lon.sin() * lat2.cos();
    let y = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();

    let degrees = x.atan2(y).to_degrees().rem_euclid(360.0);
    // rem_euclid can return exactly 360.0 for tiny negative inputs
    if degrees >= 360.0 { 0.0 } else { degrees }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn south_and_west_decode_negative() {
        assert!(decode_dms(33.0, 51.0, 54.0, Some(Reference::South)) < 0.0);
        assert!(decode_dms(151.0, 12.0, 36.0, Some(Reference::West)) < 0.0);
        assert!(decode_dms(55.0, 45.0, 0.0, Some(Reference::North)) > 0.0);
        assert!(decode_dms(37.0, 37.0, 0.0, Some(Reference::East)) > 0.0);
    }

    #[test]
    fn missing_reference_is_positive() {
        assert!((decode_dms(10.0, 30.0, 0.0, None) - 10.5).abs() < 1e-12);
    }

    #[test]
    fn decode_matches_formula() {
        let v = decode_dms(55.0, 40.0, 12.5, Some(Reference::North));
        assert!((v - (55.0 + 40.0 / 60.0 + 12.5 / 3600.0)).abs() < 1e-12);
    }

    #[test]
    fn dms_round_trip_within_tolerance() {
        for &(value, axis) in &[
            (55.734036, Axis::Latitude),
            (-33.856784, Axis::Latitude),
            (37.620393, Axis::Longitude),
            (-122.419416, Axis::Longitude),
            (0.0, Axis::Latitude),
            (89.999999999, Axis::Latitude),
        ] {
            let dms = Dms::from_decimal(value, axis);
            assert!(
                (dms.to_decimal() - value).abs() <= 1e-6,
                "{value} -> {dms:?} -> {}",
                dms.to_decimal()
            );
        }
    }

    #[test]
    fn dms_picks_hemisphere() {
        assert_eq!(Dms::from_decimal(-1.0, Axis::Latitude).reference, Reference::South);
        assert_eq!(Dms::from_decimal(1.0, Axis::Latitude).reference, Reference::North);
        assert_eq!(Dms::from_decimal(-1.0, Axis::Longitude).reference, Reference::West);
        assert_eq!(Dms::from_decimal(1.0, Axis::Longitude).reference, Reference::East);
    }

    #[test]
    fn dms_carries_rounded_seconds() {
        let dms = Dms::from_decimal(10.0 + 59.0 / 60.0 + 59.99999999 / 3600.0, Axis::Latitude);
        assert_eq!(dms.degrees, 11);
        assert_eq!(dms.minutes, 0);
        assert!(dms.seconds < 1e-6);
    }

    #[test]
    fn reference_parse() {
        assert_eq!(Reference::parse("S"), Some(Reference::South));
        assert_eq!(Reference::parse(" w\0"), Some(Reference::West));
        assert_eq!(Reference::parse(""), None);
        assert_eq!(Reference::parse("X"), None);
    }

    #[test]
    fn bearing_cardinal_directions() {
        let origin = Coordinate::new(0.0, 0.0);
        assert!((bearing(origin, Coordinate::new(0.0, 90.0)) - 90.0).abs() < 1e-9);
        assert!(bearing(origin, Coordinate::new(90.0, 0.0)).abs() < 1e-9);
        assert!((bearing(origin, Coordinate::new(-10.0, 0.0)) - 180.0).abs() < 1e-9);
        assert!((bearing(origin, Coordinate::new(0.0, -90.0)) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn bearing_always_in_range() {
        let points = [
            Coordinate::new(55.75, 37.61),
            Coordinate::new(-33.86, 151.21),
            Coordinate::new(40.71, -74.0),
            Coordinate::new(0.0, 179.9),
            Coordinate::new(0.0, -179.9),
        ];
        for a in points {
            for b in points {
                let deg = bearing(a, b);
                assert!((0.0..360.0).contains(&deg), "{a} -> {b} = {deg}");
            }
        }
    }

    #[test]
    fn coordinate_from_str() {
        let c: Coordinate = "55.666, 37.666".parse().unwrap();
        assert_eq!(c, Coordinate::new(55.666, 37.666));
        assert!("55.666".parse::<Coordinate>().is_err());
        assert!("95,0".parse::<Coordinate>().is_err());
        assert!("0,181".parse::<Coordinate>().is_err());
    }
}

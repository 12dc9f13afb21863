use anyhow::{Context, Result};
use img_parts::jpeg::Jpeg;
use img_parts::png::Png;
use img_parts::webp::WebP;
use img_parts::{Bytes, ImageEXIF};
use serde::Serialize;
use std::fs::{File, FileTimes};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::catalog::ImageKind;
use crate::error::GeotagError;
use crate::geo::Dms;

// GPS IFD tag IDs
const TAG_GPS_VERSION_ID: u16 = 0x0000;
const TAG_GPS_LATITUDE_REF: u16 = 0x0001;
const TAG_GPS_LATITUDE: u16 = 0x0002;
const TAG_GPS_LONGITUDE_REF: u16 = 0x0003;
const TAG_GPS_LONGITUDE: u16 = 0x0004;
const TAG_GPS_IMG_DIRECTION_REF: u16 = 0x0010;
const TAG_GPS_IMG_DIRECTION: u16 = 0x0011;
const TAG_GPS_DEST_LATITUDE_REF: u16 = 0x0013;
const TAG_GPS_DEST_LATITUDE: u16 = 0x0014;
const TAG_GPS_DEST_LONGITUDE_REF: u16 = 0x0015;
const TAG_GPS_DEST_LONGITUDE: u16 = 0x0016;

/// IFD0 entry pointing at the GPS IFD.
const TAG_GPS_IFD_POINTER: u16 = 0x8825;

const SECONDS_DENOMINATOR: u32 = 1_000_000;
const DIRECTION_DENOMINATOR: u32 = 100;

// img-parts strips the "Exif\0\0" prefix for JPEG, but WebP writers disagree on it
const EXIF_PREFIX: &[u8] = b"Exif\0\0";
// APP1 payload limit (65535 - 2 length bytes) minus the "Exif\0\0" prefix
const MAX_JPEG_EXIF_LEN: usize = 65533 - 6;
const IFD_ENTRY_LEN: usize = 12;
const MAX_IFD_ENTRIES: usize = 1024;

/// The set of GPS tags one commit writes to a file.
///
/// Only populated fields are written; everything else already in the file's
/// EXIF is left as it was.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GpsTags {
    pub latitude: Option<Dms>,
    pub longitude: Option<Dms>,
    pub dest_latitude: Option<Dms>,
    pub dest_longitude: Option<Dms>,
    /// Degrees clockwise from true north, `[0, 360)`.
    pub img_direction: Option<f64>,
}

impl GpsTags {
    pub fn is_empty(&self) -> bool {
        self.latitude.is_none()
            && self.longitude.is_none()
            && self.dest_latitude.is_none()
            && self.dest_longitude.is_none()
            && self.img_direction.is_none()
    }

    /// EXIF names of the tags this set writes, reference tags included.
    pub fn tag_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.latitude.is_some() {
            names.extend(["GPSLatitude", "GPSLatitudeRef"]);
        }
        if self.longitude.is_some() {
            names.extend(["GPSLongitude", "GPSLongitudeRef"]);
        }
        if self.dest_latitude.is_some() {
            names.extend(["GPSDestLatitude", "GPSDestLatitudeRef"]);
        }
        if self.dest_longitude.is_some() {
            names.extend(["GPSDestLongitude", "GPSDestLongitudeRef"]);
        }
        if self.img_direction.is_some() {
            names.extend(["GPSImgDirection", "GPSImgDirectionRef"]);
        }
        names
    }
}

/// Sink for GPS tags. Implemented by [`ExifGeotagWriter`]; tests substitute
/// writers that record or fail.
pub trait GeotagWriter {
    fn write_tags(&mut self, path: &Path, tags: &GpsTags) -> Result<()>;
}

/// Writes GPS tags into the image's own EXIF block.
///
/// The existing TIFF structure is kept byte for byte; a new GPS IFD and a
/// copy of IFD0 pointing at it are appended to the block. The file's
/// modification and access times (and creation time where the platform
/// allows setting it) are restored after every write.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExifGeotagWriter {
    /// Copy `<name>.<ext>.bak` next to the image before its first modification.
    pub backup_originals: bool,
}

impl ExifGeotagWriter {
    pub fn new(backup_originals: bool) -> Self {
        Self { backup_originals }
    }
}

impl GeotagWriter for ExifGeotagWriter {
    fn write_tags(&mut self, path: &Path, tags: &GpsTags) -> Result<()> {
        if tags.is_empty() {
            return Ok(());
        }
        let kind = ImageKind::from_path(path)
            .ok_or_else(|| GeotagError::UnsupportedFormat(path.to_path_buf()))?;

        let times = FileTimestamps::capture(path)?;

        if self.backup_originals {
            backup_file(path)?;
        }

        let entries = collect_gps_entries(tags);
        let file_bytes = std::fs::read(path).context("Failed to read image file")?;
        let output = match kind {
            ImageKind::Jpeg => write_tags_to_jpeg(path, file_bytes, &entries)?,
            ImageKind::Png => {
                let mut png = Png::from_bytes(Bytes::from(file_bytes))
                    .map_err(|e| anyhow::anyhow!("Failed to parse PNG: {e}"))?;
                merge_into_container(&mut png, path, &entries)?;
                png.encoder().bytes()
            }
            ImageKind::WebP => {
                let mut webp = WebP::from_bytes(Bytes::from(file_bytes))
                    .map_err(|e| anyhow::anyhow!("Failed to parse WebP: {e}"))?;
                merge_into_container(&mut webp, path, &entries)?;
                webp.encoder().bytes()
            }
            // The whole file is the TIFF structure.
            ImageKind::Tiff => Bytes::from(
                inject_gps_into_tiff(&file_bytes, &entries)
                    .map_err(|e| unparseable(path, e))?,
            ),
        };
        std::fs::write(path, &output).context("Failed to write image file")?;

        times
            .restore(path)
            .context("Failed to restore file timestamps")?;
        log::debug!("Wrote {} to {}", tags.tag_names().join(", "), path.display());
        Ok(())
    }
}

/// OS timestamps captured before a write.
struct FileTimestamps {
    modified: SystemTime,
    accessed: Option<SystemTime>,
    #[cfg_attr(not(any(target_os = "macos", target_os = "windows")), allow(dead_code))]
    created: Option<SystemTime>,
}

impl FileTimestamps {
    fn capture(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path).context("Failed to stat image file")?;
        Ok(Self {
            modified: meta.modified().context("Modification time unavailable")?,
            accessed: meta.accessed().ok(),
            created: meta.created().ok(),
        })
    }

    fn restore(&self, path: &Path) -> Result<()> {
        let mut times = FileTimes::new().set_modified(self.modified);
        if let Some(accessed) = self.accessed {
            times = times.set_accessed(accessed);
        }
        #[cfg(target_os = "macos")]
        {
            use std::os::macos::fs::FileTimesExt;
            if let Some(created) = self.created {
                times = times.set_created(created);
            }
        }
        #[cfg(target_os = "windows")]
        {
            use std::os::windows::fs::FileTimesExt;
            if let Some(created) = self.created {
                times = times.set_created(created);
            }
        }

        let file = File::options().write(true).open(path)?;
        file.set_times(times)?;
        Ok(())
    }
}

/// Create a backup of the original file, once.
fn backup_file(path: &Path) -> Result<PathBuf> {
    let backup_path = path.with_extension(format!(
        "{}.bak",
        path.extension().unwrap_or_default().to_string_lossy()
    ));

    if !backup_path.exists() {
        std::fs::copy(path, &backup_path).context("Failed to create backup")?;
        log::debug!("Backup created: {}", backup_path.display());
    }

    Ok(backup_path)
}

fn unparseable(path: &Path, cause: anyhow::Error) -> anyhow::Error {
    log::debug!("Existing EXIF of {} rejected: {cause:#}", path.display());
    GeotagError::UnparseableExif(path.to_path_buf()).into()
}

/// Merge GPS tags into the container's EXIF block, creating one if needed.
fn merge_into_container<I: ImageEXIF>(
    image: &mut I,
    path: &Path,
    entries: &[RawIfdEntry],
) -> Result<()> {
    let merged = match image.exif() {
        Some(existing) if !existing.is_empty() => {
            let tiff = existing.strip_prefix(EXIF_PREFIX).unwrap_or(&existing[..]);
            inject_gps_into_tiff(tiff, entries).map_err(|e| unparseable(path, e))?
        }
        _ => inject_gps_into_tiff(&empty_tiff(), entries)?,
    };
    image.set_exif(Some(Bytes::from(merged)));
    Ok(())
}

/// Merge GPS tags into a JPEG's EXIF, preserving everything else.
///
/// Strategy:
/// 1. Read the entire JPEG with img-parts (preserves all segments)
/// 2. Append the GPS IFD to the existing TIFF block, or start a fresh one
///    when the file has none
/// 3. Write back via img-parts (only the APP1 EXIF segment changes)
fn write_tags_to_jpeg(path: &Path, file_bytes: Vec<u8>, entries: &[RawIfdEntry]) -> Result<Bytes> {
    let mut jpeg = Jpeg::from_bytes(Bytes::from(file_bytes))
        .map_err(|e| anyhow::anyhow!("Failed to parse JPEG: {e}"))?;

    // Remember where the EXIF segment was originally positioned
    let orig_exif_pos = find_exif_segment_pos(&jpeg);

    merge_into_container(&mut jpeg, path, entries)?;
    let exif_len = jpeg.exif().map_or(0, |e| e.len());
    if exif_len > MAX_JPEG_EXIF_LEN {
        anyhow::bail!("EXIF block of {exif_len} bytes does not fit in a JPEG APP1 segment");
    }

    // set_exif() inserts at position 3, which may be after XMP APP1.
    // Move the EXIF segment back to its original position so EXIF comes
    // before XMP (required for many EXIF parsers).
    if let Some(new_pos) = find_exif_segment_pos(&jpeg) {
        let target_pos = orig_exif_pos.unwrap_or(1); // default: right after APP0
        if target_pos < new_pos {
            let segments = jpeg.segments_mut();
            let seg = segments.remove(new_pos);
            segments.insert(target_pos, seg);
        }
    }

    Ok(jpeg.encoder().bytes())
}

/// Find the position of the EXIF APP1 segment in a JPEG.
/// EXIF segments have marker 0xE1 (APP1) and contents starting with "Exif\0\0".
fn find_exif_segment_pos(jpeg: &Jpeg) -> Option<usize> {
    jpeg.segments()
        .iter()
        .position(|s| s.marker() == 0xE1 && s.contents().starts_with(EXIF_PREFIX))
}

/// A GPS IFD entry; the byte order is applied when it is written.
#[derive(Debug, Clone, PartialEq)]
struct RawIfdEntry {
    tag_id: u16,
    value: RawValue,
}

#[derive(Debug, Clone, PartialEq)]
enum RawValue {
    Byte(Vec<u8>),
    /// NUL-terminated.
    Ascii(Vec<u8>),
    Long(u32),
    Rational(Vec<(u32, u32)>),
}

impl RawValue {
    /// TIFF data format code.
    fn format(&self) -> u16 {
        match self {
            Self::Byte(_) => 1,
            Self::Ascii(_) => 2,
            Self::Long(_) => 4,
            Self::Rational(_) => 5,
        }
    }

    fn count(&self) -> usize {
        match self {
            Self::Byte(b) | Self::Ascii(b) => b.len(),
            Self::Long(_) => 1,
            Self::Rational(r) => r.len(),
        }
    }

    fn encode(&self, order: ByteOrder) -> Vec<u8> {
        match self {
            Self::Byte(b) | Self::Ascii(b) => b.clone(),
            Self::Long(v) => order.u32(*v).to_vec(),
            Self::Rational(r) => r
                .iter()
                .flat_map(|&(num, den)| order.u32(num).into_iter().chain(order.u32(den)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn detect(tiff: &[u8]) -> Result<Self> {
        let order = match tiff.get(0..2) {
            Some(b"II") => Self::Little,
            Some(b"MM") => Self::Big,
            _ => anyhow::bail!("Invalid TIFF byte order"),
        };
        if order.read_u16(tiff, 2)? != 42 {
            anyhow::bail!("Invalid TIFF magic number");
        }
        Ok(order)
    }

    fn u16(self, v: u16) -> [u8; 2] {
        match self {
            Self::Little => v.to_le_bytes(),
            Self::Big => v.to_be_bytes(),
        }
    }

    fn u32(self, v: u32) -> [u8; 4] {
        match self {
            Self::Little => v.to_le_bytes(),
            Self::Big => v.to_be_bytes(),
        }
    }

    fn read_u16(self, data: &[u8], offset: usize) -> Result<u16> {
        let bytes: [u8; 2] = data
            .get(offset..offset + 2)
            .and_then(|b| b.try_into().ok())
            .context("Truncated TIFF data")?;
        Ok(match self {
            Self::Little => u16::from_le_bytes(bytes),
            Self::Big => u16::from_be_bytes(bytes),
        })
    }

    fn read_u32(self, data: &[u8], offset: usize) -> Result<u32> {
        let bytes: [u8; 4] = data
            .get(offset..offset + 4)
            .and_then(|b| b.try_into().ok())
            .context("Truncated TIFF data")?;
        Ok(match self {
            Self::Little => u32::from_le_bytes(bytes),
            Self::Big => u32::from_be_bytes(bytes),
        })
    }
}

/// An IFD as raw 12-byte entries. Offsets inside the entries stay valid as
/// long as the original bytes are kept in place.
struct Ifd {
    entries: Vec<[u8; IFD_ENTRY_LEN]>,
    next: u32,
}

impl Ifd {
    fn parse(data: &[u8], offset: usize, order: ByteOrder) -> Result<Self> {
        let count = order.read_u16(data, offset)? as usize;
        if count > MAX_IFD_ENTRIES {
            anyhow::bail!("IFD at {offset} claims {count} entries");
        }
        let start = offset + 2;
        let end = start + count * IFD_ENTRY_LEN;
        if end + 4 > data.len() {
            anyhow::bail!("IFD entries extend beyond TIFF data");
        }
        let entries = data[start..end]
            .chunks_exact(IFD_ENTRY_LEN)
            .map(|c| {
                let mut entry = [0u8; IFD_ENTRY_LEN];
                entry.copy_from_slice(c);
                entry
            })
            .collect();
        Ok(Self {
            entries,
            next: order.read_u32(data, end)?,
        })
    }

    fn tag(entry: &[u8; IFD_ENTRY_LEN], order: ByteOrder) -> u16 {
        match order {
            ByteOrder::Little => u16::from_le_bytes([entry[0], entry[1]]),
            ByteOrder::Big => u16::from_be_bytes([entry[0], entry[1]]),
        }
    }

    fn find(&self, tag_id: u16, order: ByteOrder) -> Option<&[u8; IFD_ENTRY_LEN]> {
        self.entries.iter().find(|e| Self::tag(e, order) == tag_id)
    }

    /// Insert or replace the entry with the same tag, keeping tags ascending.
    fn upsert(&mut self, entry: [u8; IFD_ENTRY_LEN], order: ByteOrder) {
        let tag_id = Self::tag(&entry, order);
        self.entries.retain(|e| Self::tag(e, order) != tag_id);
        self.entries.push(entry);
        self.entries.sort_by_key(|e| Self::tag(e, order));
    }

    /// Append the IFD to `out` at a word boundary and return its offset.
    fn write(&self, out: &mut Vec<u8>, order: ByteOrder) -> Result<u32> {
        pad_to_word(out);
        let offset = tiff_offset(out)?;
        out.extend_from_slice(&order.u16(self.entries.len() as u16));
        for entry in &self.entries {
            out.extend_from_slice(entry);
        }
        out.extend_from_slice(&order.u32(self.next));
        Ok(offset)
    }
}

fn pad_to_word(out: &mut Vec<u8>) {
    if out.len() % 2 != 0 {
        out.push(0);
    }
}

fn tiff_offset(out: &[u8]) -> Result<u32> {
    u32::try_from(out.len()).context("TIFF data exceeds 4 GiB")
}

/// Encode one entry, appending its value to `out` when it does not fit inline.
fn encode_entry(entry: &RawIfdEntry, out: &mut Vec<u8>, order: ByteOrder) -> Result<[u8; IFD_ENTRY_LEN]> {
    let data = entry.value.encode(order);
    let mut raw = [0u8; IFD_ENTRY_LEN];
    raw[0..2].copy_from_slice(&order.u16(entry.tag_id));
    raw[2..4].copy_from_slice(&order.u16(entry.value.format()));
    raw[4..8].copy_from_slice(&order.u32(entry.value.count() as u32));
    if data.len() <= 4 {
        raw[8..8 + data.len()].copy_from_slice(&data);
    } else {
        pad_to_word(out);
        raw[8..12].copy_from_slice(&order.u32(tiff_offset(out)?));
        out.extend_from_slice(&data);
    }
    Ok(raw)
}

/// A little-endian TIFF header followed by an empty IFD0.
fn empty_tiff() -> Vec<u8> {
    let mut tiff = b"II*\0".to_vec();
    tiff.extend_from_slice(&8u32.to_le_bytes());
    tiff.extend_from_slice(&0u16.to_le_bytes());
    tiff.extend_from_slice(&0u32.to_le_bytes());
    tiff
}

/// Merge GPS entries into raw TIFF data, in the data's own byte order.
///
/// The original bytes are kept as they are. The merged GPS IFD (existing
/// entries plus the new ones, new ones winning) and a copy of IFD0 whose
/// GPS pointer targets it are appended, then the header is pointed at the
/// new IFD0. Fails on anything that does not parse as TIFF.
fn inject_gps_into_tiff(original: &[u8], entries: &[RawIfdEntry]) -> Result<Vec<u8>> {
    let order = ByteOrder::detect(original)?;
    let ifd0_offset = order.read_u32(original, 4)? as usize;
    let mut ifd0 = Ifd::parse(original, ifd0_offset, order).context("Failed to parse IFD0")?;

    let mut result = original.to_vec();

    let mut gps = match ifd0.find(TAG_GPS_IFD_POINTER, order) {
        Some(pointer) => {
            let offset = order.read_u32(pointer, 8)? as usize;
            let mut gps = Ifd::parse(original, offset, order).context("Failed to parse GPS IFD")?;
            gps.next = 0;
            gps
        }
        None => {
            let version = RawIfdEntry {
                tag_id: TAG_GPS_VERSION_ID,
                value: RawValue::Byte(vec![2, 3, 0, 0]),
            };
            Ifd {
                entries: vec![encode_entry(&version, &mut result, order)?],
                next: 0,
            }
        }
    };

    for entry in entries {
        let raw = encode_entry(entry, &mut result, order)?;
        gps.upsert(raw, order);
    }
    let gps_offset = gps.write(&mut result, order)?;

    let pointer = RawIfdEntry {
        tag_id: TAG_GPS_IFD_POINTER,
        value: RawValue::Long(gps_offset),
    };
    ifd0.upsert(encode_entry(&pointer, &mut result, order)?, order);
    let new_ifd0_offset = ifd0.write(&mut result, order)?;

    // Update TIFF header to point to new IFD0
    result[4..8].copy_from_slice(&order.u32(new_ifd0_offset));
    Ok(result)
}

fn dms_rationals(dms: &Dms) -> Vec<(u32, u32)> {
    let seconds = (dms.seconds * SECONDS_DENOMINATOR as f64).round() as u32;
    vec![
        (dms.degrees, 1),
        (dms.minutes, 1),
        (seconds, SECONDS_DENOMINATOR),
    ]
}

fn direction_rational(direction: f64) -> (u32, u32) {
    let full_turn = 360 * DIRECTION_DENOMINATOR;
    let num = (direction * DIRECTION_DENOMINATOR as f64).round() as u32 % full_turn;
    (num, DIRECTION_DENOMINATOR)
}

fn ascii(c: char) -> RawValue {
    RawValue::Ascii(format!("{c}\0").into_bytes())
}

fn push_dms(entries: &mut Vec<RawIfdEntry>, ref_id: u16, value_id: u16, dms: &Dms) {
    entries.push(RawIfdEntry {
        tag_id: ref_id,
        value: ascii(dms.reference.as_char()),
    });
    entries.push(RawIfdEntry {
        tag_id: value_id,
        value: RawValue::Rational(dms_rationals(dms)),
    });
}

/// Translate a [`GpsTags`] set into GPS IFD entries.
fn collect_gps_entries(gps: &GpsTags) -> Vec<RawIfdEntry> {
    let mut entries = Vec::new();

    if let Some(ref lat) = gps.latitude {
        push_dms(&mut entries, TAG_GPS_LATITUDE_REF, TAG_GPS_LATITUDE, lat);
    }
    if let Some(ref lon) = gps.longitude {
        push_dms(&mut entries, TAG_GPS_LONGITUDE_REF, TAG_GPS_LONGITUDE, lon);
    }
    if let Some(ref lat) = gps.dest_latitude {
        push_dms(&mut entries, TAG_GPS_DEST_LATITUDE_REF, TAG_GPS_DEST_LATITUDE, lat);
    }
    if let Some(ref lon) = gps.dest_longitude {
        push_dms(&mut entries, TAG_GPS_DEST_LONGITUDE_REF, TAG_GPS_DEST_LONGITUDE, lon);
    }
    if let Some(direction) = gps.img_direction {
        // "T" = true north
        entries.push(RawIfdEntry {
            tag_id: TAG_GPS_IMG_DIRECTION_REF,
            value: ascii('T'),
        });
        entries.push(RawIfdEntry {
            tag_id: TAG_GPS_IMG_DIRECTION,
            value: RawValue::Rational(vec![direction_rational(direction)]),
        });
    }

    entries
}

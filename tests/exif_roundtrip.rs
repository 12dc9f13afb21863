use std::collections::HashSet;
use std::fs::{self, File, FileTimes};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use geotagger::catalog::{Catalog, EditMode, PhotoRecord};
use geotagger::commit::{CommitEngine, CommitOutcome, FailureAction, FailurePolicy};
use geotagger::exif::{
    ExifGeotagReader, ExifGeotagWriter, GeotagReader, GeotagWriter, GpsTags, read_geotag,
};
use geotagger::geo::{Axis, Coordinate, Dms, bearing};
use tempfile::TempDir;

const EPSILON: f64 = 1e-6;

fn make_jpeg(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    image::RgbImage::from_pixel(16, 16, image::Rgb([120, 80, 40]))
        .save(&path)
        .unwrap();
    path
}

fn age_file(path: &Path, by: Duration) -> SystemTime {
    let when = SystemTime::now() - by;
    let file = File::options().write(true).open(path).unwrap();
    file.set_times(FileTimes::new().set_modified(when).set_accessed(when))
        .unwrap();
    fs::metadata(path).unwrap().modified().unwrap()
}

fn assert_close(actual: Coordinate, expected: Coordinate) {
    assert!(
        (actual.latitude - expected.latitude).abs() <= EPSILON
            && (actual.longitude - expected.longitude).abs() <= EPSILON,
        "{actual} != {expected}"
    );
}

fn tags_between(here: Coordinate, there: Coordinate) -> GpsTags {
    GpsTags {
        latitude: Some(Dms::from_decimal(here.latitude, Axis::Latitude)),
        longitude: Some(Dms::from_decimal(here.longitude, Axis::Longitude)),
        dest_latitude: Some(Dms::from_decimal(there.latitude, Axis::Latitude)),
        dest_longitude: Some(Dms::from_decimal(there.longitude, Axis::Longitude)),
        img_direction: Some(bearing(here, there)),
    }
}

/// GPS fields as an independent EXIF parser sees them.
fn parse_exif(path: &Path) -> ::exif::Exif {
    let mut reader = BufReader::new(File::open(path).unwrap());
    ::exif::Reader::new().read_from_container(&mut reader).unwrap()
}

fn rational_values(exif: &::exif::Exif, tag: ::exif::Tag) -> Vec<f64> {
    let field = exif
        .get_field(tag, ::exif::In::PRIMARY)
        .unwrap_or_else(|| panic!("{tag} missing"));
    match field.value {
        ::exif::Value::Rational(ref v) => v.iter().map(|r| r.to_f64()).collect(),
        ref other => panic!("{tag}: unexpected {other:?}"),
    }
}

#[test]
fn jpeg_without_exif_reads_empty() {
    let dir = TempDir::new().unwrap();
    let path = make_jpeg(dir.path(), "plain.jpg");
    let tag = read_geotag(&path).unwrap();
    assert!(tag.position.is_none());
    assert!(tag.destination.is_none());
}

#[test]
fn position_and_destination_survive_a_write() {
    let dir = TempDir::new().unwrap();
    let path = make_jpeg(dir.path(), "view.jpg");

    let here = Coordinate::new(55.753930, 37.620795);
    let there = Coordinate::new(-33.856784, 151.215297);
    ExifGeotagWriter::new(false)
        .write_tags(&path, &tags_between(here, there))
        .unwrap();

    let tag = read_geotag(&path).unwrap();
    assert_close(tag.position.unwrap(), here);
    assert_close(tag.destination.unwrap(), there);
}

#[test]
fn write_keeps_file_timestamps() {
    let dir = TempDir::new().unwrap();
    let path = make_jpeg(dir.path(), "old.jpg");
    let before = age_file(&path, Duration::from_secs(30 * 24 * 3600));

    let tags = GpsTags {
        latitude: Some(Dms::from_decimal(10.0, Axis::Latitude)),
        longitude: Some(Dms::from_decimal(20.0, Axis::Longitude)),
        ..Default::default()
    };
    ExifGeotagWriter::new(false).write_tags(&path, &tags).unwrap();

    assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), before);
    assert!(read_geotag(&path).unwrap().position.is_some());
}

#[test]
fn backup_is_made_before_first_write() {
    let dir = TempDir::new().unwrap();
    let path = make_jpeg(dir.path(), "keep.jpg");
    let original = fs::read(&path).unwrap();

    let tags = GpsTags {
        latitude: Some(Dms::from_decimal(1.0, Axis::Latitude)),
        longitude: Some(Dms::from_decimal(2.0, Axis::Longitude)),
        ..Default::default()
    };
    ExifGeotagWriter::new(true).write_tags(&path, &tags).unwrap();

    let backup = dir.path().join("keep.jpg.bak");
    assert_eq!(fs::read(backup).unwrap(), original);
}

#[test]
fn scan_keeps_corrupted_files() {
    let dir = TempDir::new().unwrap();
    let tagged = make_jpeg(dir.path(), "tagged.jpg");
    ExifGeotagWriter::new(false)
        .write_tags(
            &tagged,
            &GpsTags {
                latitude: Some(Dms::from_decimal(48.858370, Axis::Latitude)),
                longitude: Some(Dms::from_decimal(2.294481, Axis::Longitude)),
                ..Default::default()
            },
        )
        .unwrap();
    fs::write(dir.path().join("broken.jpg"), b"definitely not a jpeg").unwrap();
    fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

    let catalog = Catalog::scan(dir.path(), &ExifGeotagReader).unwrap();
    assert_eq!(catalog.len(), 2);

    let broken = catalog.get("broken.jpg").unwrap();
    assert!(broken.source_coordinate.is_none());
    assert!(!broken.is_modified);

    assert_close(
        catalog.get("tagged.jpg").unwrap().source_coordinate.unwrap(),
        Coordinate::new(48.858370, 2.294481),
    );
    assert_eq!(catalog.coordinate_progress(), 50);
}

#[test]
fn commit_writes_direction_from_stored_position() {
    let dir = TempDir::new().unwrap();
    let path = make_jpeg(dir.path(), "facing.jpg");
    let here = Coordinate::new(40.0, -74.0);
    ExifGeotagWriter::new(false)
        .write_tags(
            &path,
            &GpsTags {
                latitude: Some(Dms::from_decimal(here.latitude, Axis::Latitude)),
                longitude: Some(Dms::from_decimal(here.longitude, Axis::Longitude)),
                ..Default::default()
            },
        )
        .unwrap();

    let mut catalog = Catalog::scan(dir.path(), &ExifGeotagReader).unwrap();
    let selected: HashSet<String> = ["facing.jpg".to_string()].into();
    catalog.set_pending_edit(&selected, EditMode::Destination, 41.0, -74.0);

    let mut writer = ExifGeotagWriter::new(false);
    let report = CommitEngine::new(false).commit(
        catalog.records_mut(),
        &mut writer,
        &mut FailurePolicy(FailureAction::Cancel),
    );

    assert_eq!(report.committed_count, 1);
    let entry = report.entry("facing.jpg").unwrap();
    assert_eq!(entry.outcome, CommitOutcome::Committed);
    // due north
    assert!(entry.tags.img_direction.unwrap().abs() < 1e-9);
    assert!(entry.tags.latitude.is_none());

    let tag = read_geotag(&path).unwrap();
    assert_close(tag.position.unwrap(), here);
    assert_close(tag.destination.unwrap(), Coordinate::new(41.0, -74.0));

    let record: &PhotoRecord = catalog.get("facing.jpg").unwrap();
    assert!(!record.is_modified);
    assert_close(record.source_destination.unwrap(), Coordinate::new(41.0, -74.0));
}

#[test]
fn unsupported_extension_fails_per_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("image.bmp");
    fs::write(&path, b"BM").unwrap();
    let tags = GpsTags {
        latitude: Some(Dms::from_decimal(1.0, Axis::Latitude)),
        longitude: Some(Dms::from_decimal(1.0, Axis::Longitude)),
        ..Default::default()
    };
    assert!(ExifGeotagWriter::new(false).write_tags(&path, &tags).is_err());
}

#[test]
fn written_gps_fields_decode_with_kamadak() {
    let dir = TempDir::new().unwrap();
    let path = make_jpeg(dir.path(), "decode.jpg");
    let here = Coordinate::new(55.753930, 37.620795);
    let there = Coordinate::new(55.752500, 37.623100);
    ExifGeotagWriter::new(false)
        .write_tags(&path, &tags_between(here, there))
        .unwrap();

    let exif = parse_exif(&path);
    let lat = rational_values(&exif, ::exif::Tag::GPSLatitude);
    assert_eq!(lat.len(), 3);
    assert_eq!(lat[0], 55.0);
    assert_eq!(lat[1], 45.0);
    assert_eq!(rational_values(&exif, ::exif::Tag::GPSDestLatitude).len(), 3);
    assert!(exif.get_field(::exif::Tag::GPSDestLongitudeRef, ::exif::In::PRIMARY).is_some());

    let direction = rational_values(&exif, ::exif::Tag::GPSImgDirection)[0];
    assert!((direction - bearing(here, there)).abs() < 0.01, "{direction}");
}

#[test]
fn southern_and_western_hemispheres_keep_their_sign() {
    let dir = TempDir::new().unwrap();
    let path = make_jpeg(dir.path(), "santiago.jpg");
    let here = Coordinate::new(-33.437797, -70.650445);
    let there = Coordinate::new(-33.440616, -70.648270);
    ExifGeotagWriter::new(false)
        .write_tags(&path, &tags_between(here, there))
        .unwrap();

    let tag = ExifGeotagReader.read_geotag(&path).unwrap();
    assert_close(tag.position.unwrap(), here);
    assert_close(tag.destination.unwrap(), there);
}

#[test]
fn destination_alone_reads_back() {
    let dir = TempDir::new().unwrap();
    let path = make_jpeg(dir.path(), "target.jpg");
    let there = Coordinate::new(48.858370, 2.294481);
    let tags = GpsTags {
        dest_latitude: Some(Dms::from_decimal(there.latitude, Axis::Latitude)),
        dest_longitude: Some(Dms::from_decimal(there.longitude, Axis::Longitude)),
        ..Default::default()
    };
    ExifGeotagWriter::new(false).write_tags(&path, &tags).unwrap();

    let tag = read_geotag(&path).unwrap();
    assert!(tag.position.is_none());
    assert_close(tag.destination.unwrap(), there);

    let catalog = Catalog::scan(dir.path(), &ExifGeotagReader).unwrap();
    let record = catalog.get("target.jpg").unwrap();
    assert_close(record.source_destination.unwrap(), there);
    assert!(record.source_coordinate.is_none());
}

#[test]
fn second_write_replaces_position() {
    let dir = TempDir::new().unwrap();
    let path = make_jpeg(dir.path(), "moved.jpg");
    let mut writer = ExifGeotagWriter::new(false);
    for point in [Coordinate::new(10.0, 20.0), Coordinate::new(-10.5, -20.25)] {
        let tags = GpsTags {
            latitude: Some(Dms::from_decimal(point.latitude, Axis::Latitude)),
            longitude: Some(Dms::from_decimal(point.longitude, Axis::Longitude)),
            ..Default::default()
        };
        writer.write_tags(&path, &tags).unwrap();
    }

    assert_close(read_geotag(&path).unwrap().position.unwrap(), Coordinate::new(-10.5, -20.25));
    let latitudes = parse_exif(&path)
        .fields()
        .filter(|f| f.tag == ::exif::Tag::GPSLatitude)
        .count();
    assert_eq!(latitudes, 1);
}

// src/track/gpx.rs
//! GPX track document rendering and append-merging
//!
//! Documents are laid out one element per line so that a flush can splice
//! new track points in front of `</trkseg>` without re-parsing the file,
//! and the result is byte-identical to rendering all points at once.

use crate::gps::Fix;
use chrono::{DateTime, Utc};

const XML_HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";
const GPX_OPEN: &str = "<gpx version=\"1.1\" creator=\"GPS Tracker\">\n";
const TRACK_OPEN: &str = "<trk><name>Track</name><trkseg>\n";
const SEGMENT_CLOSE: &str = "</trkseg>";
const TRACK_CLOSE: &str = "</trkseg></trk>\n</gpx>\n";

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const FILE_NAME_FORMAT: &str = "%Y-%m-%d-%H%M%S";

/// Render a complete document: waypoints first, then a single track segment
pub fn render(fixes: &[Fix], waypoints: &[Fix]) -> String {
    let mut gpx = String::from(XML_HEADER);
    gpx.push_str(GPX_OPEN);

    for waypoint in waypoints {
        gpx.push_str(&format!(
            "<wpt lat=\"{}\" lon=\"{}\"><ele>{}</ele><time>{}</time><name>Waypoint</name></wpt>\n",
            waypoint.latitude,
            waypoint.longitude,
            waypoint.altitude_or_zero(),
            format_time(waypoint.timestamp_ms)
        ));
    }

    gpx.push_str(TRACK_OPEN);
    gpx.push_str(&render_track_points(fixes));
    gpx.push_str(TRACK_CLOSE);
    gpx
}

/// Append `fixes` to an existing document, or start a fresh one.
///
/// The new points go in front of the first `</trkseg>`. A document without
/// that tag comes back unchanged and the points are lost.
pub fn merge_append(existing: Option<&str>, fixes: &[Fix]) -> String {
    let Some(existing) = existing else {
        return render(fixes, &[]);
    };

    match existing.find(SEGMENT_CLOSE) {
        Some(pos) => {
            let points = render_track_points(fixes);
            let mut merged = String::with_capacity(existing.len() + points.len());
            merged.push_str(&existing[..pos]);
            merged.push_str(&points);
            merged.push_str(&existing[pos..]);
            merged
        }
        None => {
            log::warn!(
                "Track document has no {} tag, dropping {} point(s)",
                SEGMENT_CLOSE,
                fixes.len()
            );
            existing.to_string()
        }
    }
}

/// File name for a session track.
///
/// Sessions with a start time get a name derived from it; otherwise the
/// current time is used, which never matches an earlier file. The start
/// time is formatted in UTC, not the local time zone, so names do not
/// shift with the host's zone or daylight saving.
pub fn track_file_name(start_ms: i64, now_ms: i64) -> String {
    let started = (start_ms > 0)
        .then(|| DateTime::<Utc>::from_timestamp_millis(start_ms))
        .flatten();

    match started {
        Some(start) => format!("{}.gpx", start.format(FILE_NAME_FORMAT)),
        None => format!("track_{}.gpx", now_ms),
    }
}

fn render_track_points(fixes: &[Fix]) -> String {
    fixes
        .iter()
        .map(|fix| {
            format!(
                "<trkpt lat=\"{}\" lon=\"{}\"><ele>{}</ele><time>{}</time></trkpt>\n",
                fix.latitude,
                fix.longitude,
                fix.altitude_or_zero(),
                format_time(fix.timestamp_ms)
            )
        })
        .collect()
}

fn format_time(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .unwrap_or_default()
        .format(TIME_FORMAT)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quick_xml::events::Event;
    use quick_xml::Reader;

    // 2023-11-14T22:13:20Z
    const T0: i64 = 1_700_000_000_000;

    fn fix(lat: f64, lon: f64, ts: i64) -> Fix {
        Fix::new(lat, lon, ts).with_altitude(100.5)
    }

    /// Walk the document and return (element names in order), failing on bad nesting
    fn element_names(doc: &str) -> Vec<String> {
        let mut reader = Reader::from_str(doc);
        let mut names = Vec::new();
        let mut stack = Vec::new();

        loop {
            match reader.read_event().expect("well-formed xml") {
                Event::Start(e) => {
                    let name = String::from_utf8(e.name().as_ref().to_vec()).unwrap();
                    stack.push(name.clone());
                    names.push(name);
                }
                Event::End(e) => {
                    let name = String::from_utf8(e.name().as_ref().to_vec()).unwrap();
                    assert_eq!(stack.pop(), Some(name));
                }
                Event::Eof => break,
                _ => {}
            }
        }

        assert!(stack.is_empty());
        names
    }

    fn count(names: &[String], element: &str) -> usize {
        names.iter().filter(|n| n.as_str() == element).count()
    }

    #[test]
    fn test_render_empty() {
        let doc = render(&[], &[]);
        assert!(doc.starts_with("<?xml"));
        assert!(doc.contains("<trkseg>\n</trkseg>"));

        let names = element_names(&doc);
        assert_eq!(count(&names, "gpx"), 1);
        assert_eq!(count(&names, "trkseg"), 1);
        assert_eq!(count(&names, "wpt"), 0);
        assert_eq!(count(&names, "trkpt"), 0);
    }

    #[test]
    fn test_render_points_and_waypoints() {
        let fixes = [fix(42.0, -71.0, T0), fix(42.5, -71.25, T0 + 1_000)];
        let waypoints = [fix(42.25, -71.5, T0 + 500)];
        let doc = render(&fixes, &waypoints);

        assert!(doc.contains(
            "<wpt lat=\"42.25\" lon=\"-71.5\"><ele>100.5</ele><time>2023-11-14T22:13:20Z</time><name>Waypoint</name></wpt>"
        ));
        assert!(doc.contains(
            "<trkpt lat=\"42\" lon=\"-71\"><ele>100.5</ele><time>2023-11-14T22:13:20Z</time></trkpt>"
        ));
        assert!(doc.contains("<time>2023-11-14T22:13:21Z</time>"));

        // Waypoints come before the track
        assert!(doc.find("<wpt").unwrap() < doc.find("<trk>").unwrap());

        let names = element_names(&doc);
        assert_eq!(count(&names, "wpt"), 1);
        assert_eq!(count(&names, "trkpt"), 2);
    }

    #[test]
    fn test_missing_altitude_renders_zero() {
        let doc = render(&[Fix::new(1.0, 2.0, T0)], &[]);
        assert!(doc.contains("<ele>0</ele>"));
    }

    #[test]
    fn test_out_of_range_coordinates_pass_through() {
        let doc = render(&[Fix::new(123.5, -200.25, T0)], &[]);
        assert!(doc.contains("lat=\"123.5\" lon=\"-200.25\""));
    }

    #[test]
    fn test_merge_into_nothing_matches_render() {
        let fixes = [fix(1.0, 2.0, T0), fix(3.0, 4.0, T0 + 1_000)];
        assert_eq!(merge_append(None, &fixes), render(&fixes, &[]));
    }

    #[test]
    fn test_merge_round_trip_matches_render() {
        let f1 = fix(1.0, 2.0, T0);
        let f2 = fix(3.0, 4.0, T0 + 1_000);
        let f3 = fix(5.0, 6.0, T0 + 2_000);

        let first = merge_append(None, &[f1]);
        let second = merge_append(Some(&first), &[f2]);
        assert_eq!(second, render(&[f1, f2], &[]));

        let third = merge_append(Some(&second), &[f3]);
        assert_eq!(third, render(&[f1, f2, f3], &[]));
        assert_eq!(count(&element_names(&third), "trkpt"), 3);
    }

    #[test]
    fn test_merge_keeps_existing_content() {
        let existing = render(&[fix(1.0, 2.0, T0)], &[fix(9.0, 9.0, T0)]);
        let merged = merge_append(Some(&existing), &[fix(3.0, 4.0, T0 + 1_000)]);

        let pos = existing.find(SEGMENT_CLOSE).unwrap();
        assert!(merged.starts_with(&existing[..pos]));
        assert!(merged.ends_with(&existing[pos..]));
        assert_eq!(count(&element_names(&merged), "wpt"), 1);
    }

    #[test]
    fn test_merge_only_splices_first_segment_close() {
        let existing = "<trkseg></trkseg><trkseg></trkseg>";
        let merged = merge_append(Some(existing), &[fix(1.0, 2.0, T0)]);
        assert_eq!(merged.matches("<trkpt").count(), 1);
        assert!(merged.starts_with("<trkseg><trkpt"));
        assert!(merged.ends_with("</trkpt>\n</trkseg><trkseg></trkseg>"));
    }

    #[test]
    fn test_merge_without_segment_close_drops_points() {
        let existing = "<gpx></gpx>";
        assert_eq!(merge_append(Some(existing), &[fix(1.0, 2.0, T0)]), existing);
    }

    #[test]
    fn test_track_file_name() {
        assert_eq!(track_file_name(T0, T0 + 5_000), "2023-11-14-221320.gpx");
        assert_eq!(track_file_name(0, 1_234), "track_1234.gpx");
        assert_eq!(track_file_name(-5, 99), "track_99.gpx");
    }
}

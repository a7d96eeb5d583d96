use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Deepest valid cluster level; 0 is the root.
pub const MAX_LEVEL: i32 = 4;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Axis-aligned lat/lon rectangle shown by the client.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Viewport {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

/// A persisted cluster as loaded for traversal.
///
/// Bounding box and date envelope fields are absent for clusters without
/// members.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterRow {
    pub cluster_id: i32,
    pub parent_cluster_id: Option<i32>,
    pub centroid_lat: f64,
    pub centroid_lon: f64,
    pub centroid_time_days: Option<f64>,
    pub level: i32,
    pub min_lat: Option<f64>,
    pub max_lat: Option<f64>,
    pub min_lon: Option<f64>,
    pub max_lon: Option<f64>,
    pub min_date: Option<DateTime<Utc>>,
    pub max_date: Option<DateTime<Utc>>,
    pub event_ids: Vec<i32>,
}

/// An event joined with its tag names and cluster memberships.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventDetail {
    pub event_id: i32,
    pub event_name: String,
    pub date: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub description: Option<String>,
    pub image: Option<String>,
    pub video: Option<String>,
    pub tags: Vec<String>,
    pub clusters: Vec<i32>,
}

impl EventDetail {
    /// Replaces NaN coordinates with 0.
    // TODO: flag events with coerced coordinates instead of hiding them.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        if self.lat.is_nan() {
            self.lat = 0.0;
        }
        if self.lon.is_nan() {
            self.lon = 0.0;
        }
        self
    }
}

/// A surviving cluster in the response. `events` is non-empty only for leaves.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClusterOut {
    pub cluster_id: i32,
    pub parent_cluster_id: Option<i32>,
    pub centroid_lat: f64,
    pub centroid_lon: f64,
    pub centroid_time_days: Option<f64>,
    pub centroid_date: Option<String>,
    pub level: i32,
    pub min_lat: Option<f64>,
    pub max_lat: Option<f64>,
    pub min_lon: Option<f64>,
    pub max_lon: Option<f64>,
    pub min_date: Option<DateTime<Utc>>,
    pub max_date: Option<DateTime<Utc>>,
    pub event_ids: Vec<i32>,
    pub events: Vec<EventDetail>,
}

impl ClusterOut {
    #[must_use]
    pub fn new(row: ClusterRow, events: Vec<EventDetail>) -> Self {
        Self {
            cluster_id: row.cluster_id,
            parent_cluster_id: row.parent_cluster_id,
            centroid_lat: row.centroid_lat,
            centroid_lon: row.centroid_lon,
            centroid_date: row.centroid_time_days.and_then(format_days),
            centroid_time_days: row.centroid_time_days,
            level: row.level,
            min_lat: row.min_lat,
            max_lat: row.max_lat,
            min_lon: row.min_lon,
            max_lon: row.max_lon,
            min_date: row.min_date,
            max_date: row.max_date,
            event_ids: row.event_ids,
            events,
        }
    }
}

/// Formats days since the Unix epoch as `YYYY-MM-DD`.
#[must_use]
pub fn format_days(days: f64) -> Option<String> {
    if !days.is_finite() {
        return None;
    }
    let seconds = (days * SECONDS_PER_DAY).floor();
    if seconds.abs() > i64::MAX as f64 {
        return None;
    }
    let date = chrono::NaiveDateTime::from_timestamp_opt(seconds as i64, 0)?;
    Some(date.format("%Y-%m-%d").to_string())
}

/// Converts a `YYYY-MM-DD` date to days since the Unix epoch.
#[must_use]
pub fn parse_days(date: &str) -> Option<f64> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()?;
    let epoch = NaiveDate::from_ymd(1970, 1, 1);
    Some(date.signed_duration_since(epoch).num_days() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(lat: f64, lon: f64) -> EventDetail {
        EventDetail {
            event_id: 1,
            event_name: "e".into(),
            date: Utc.ymd(2020, 1, 1).and_hms(0, 0, 0),
            lat,
            lon,
            description: None,
            image: None,
            video: None,
            tags: vec![],
            clusters: vec![],
        }
    }

    #[test]
    fn nan_coordinates_become_zero() {
        let e = event(f64::NAN, f64::NAN).sanitized();
        assert_eq!(e.lat, 0.0);
        assert_eq!(e.lon, 0.0);
        let e = event(13.7, 100.5).sanitized();
        assert_eq!((e.lat, e.lon), (13.7, 100.5));
    }

    #[test]
    fn days_round_trip_through_dates() {
        assert_eq!(parse_days("1970-01-01"), Some(0.0));
        assert_eq!(parse_days("2023-06-15"), Some(19523.0));
        assert_eq!(format_days(19523.0).as_deref(), Some("2023-06-15"));
        assert_eq!(format_days(19523.75).as_deref(), Some("2023-06-15"));
        assert_eq!(format_days(-1.0).as_deref(), Some("1969-12-31"));
        assert_eq!(format_days(f64::NAN), None);
        assert_eq!(parse_days("15/06/2023"), None);
    }
}

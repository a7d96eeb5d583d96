//! Request filters and their compilation into parameterized SQL predicates.
//!
//! User-supplied values never reach SQL text: every fragment refers to its
//! values by position in the bind vector, and placeholders are numbered in the
//! order the values were bound.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Deserialize;
use std::fmt;

use super::model::{ClusterRow, Viewport, MAX_LEVEL};
use crate::error::Error;

pub const MIN_YEAR: i32 = 1900;
pub const MAX_YEAR: i32 = 2100;

/// Body of `POST /api/clusters/hierarchical`.
#[derive(Debug, Deserialize)]
pub struct ClusterQuery {
    pub viewport: Viewport,
    #[serde(default)]
    pub max_level: Option<i32>,
    #[serde(default)]
    pub tag_filter: Option<TagFilter>,
    #[serde(default)]
    pub date_filter: Option<DateFilter>,
    #[serde(default)]
    pub max_clusters: Option<i64>,
}

/// Body of `POST /api/events/filter`.
#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub tag_filter: Option<TagFilter>,
    #[serde(default)]
    pub date_filter: Option<DateFilter>,
}

#[derive(Debug, Deserialize)]
pub struct TagFilter {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub operator: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DateFilter {
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TagOperator {
    And,
    Or,
}

impl TagOperator {
    /// Anything other than `"AND"` means OR.
    #[must_use]
    pub fn parse(operator: Option<&str>) -> Self {
        match operator {
            Some("AND") => Self::And,
            _ => Self::Or,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TagCriteria {
    pub tags: Vec<String>,
    pub operator: TagOperator,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DateCriteria {
    Year(i32),
    Range {
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
}

impl DateCriteria {
    /// The closed period a cluster's date envelope must intersect, if the
    /// criteria bound both ends.
    #[must_use]
    pub fn period(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match *self {
            Self::Year(year) => Some((
                Utc.ymd(year, 1, 1).and_hms(0, 0, 0),
                Utc.ymd(year, 12, 31).and_hms(23, 59, 59),
            )),
            Self::Range {
                start: Some(start),
                end: Some(end),
            } => Some((start, end)),
            Self::Range { .. } => None,
        }
    }
}

/// Validated tag and date criteria over events.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventCriteria {
    pub tags: Option<TagCriteria>,
    pub date: Option<DateCriteria>,
}

/// A validated hierarchical cluster query.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterRequest {
    pub viewport: Viewport,
    pub max_level: i32,
    pub criteria: EventCriteria,
    pub max_clusters: Option<usize>,
}

impl ClusterQuery {
    /// # Errors
    ///
    /// Returns `BadRequest` if the viewport, level, year, dates or cap are
    /// out of range.
    pub fn validate(self) -> Result<ClusterRequest, Error> {
        let viewport = validate_viewport(self.viewport)?;
        let max_level = match self.max_level {
            None | Some(0) => MAX_LEVEL,
            Some(level) if level > 0 && level <= MAX_LEVEL => level,
            Some(level) => {
                return Err(Error::BadRequest(format!(
                    "max_level must be between 0 and {} (got {})",
                    MAX_LEVEL, level
                )))
            }
        };
        let max_clusters = match self.max_clusters {
            None => None,
            Some(cap) if cap > 0 => Some(cap as usize),
            Some(cap) => {
                return Err(Error::BadRequest(format!(
                    "max_clusters must be a positive integer (got {})",
                    cap
                )))
            }
        };
        let criteria = EventFilter {
            tag_filter: self.tag_filter,
            date_filter: self.date_filter,
        }
        .validate()?;

        Ok(ClusterRequest {
            viewport,
            max_level,
            criteria,
            max_clusters,
        })
    }
}

impl EventFilter {
    /// # Errors
    ///
    /// Returns `BadRequest` if the year is outside 1900..=2100 or a date does
    /// not parse.
    pub fn validate(self) -> Result<EventCriteria, Error> {
        let tags = self.tag_filter.and_then(|filter| {
            if filter.tags.is_empty() {
                None
            } else {
                Some(TagCriteria {
                    operator: TagOperator::parse(filter.operator.as_deref()),
                    tags: filter.tags,
                })
            }
        });
        let date = match self.date_filter {
            Some(filter) => validate_date_filter(filter)?,
            None => None,
        };
        Ok(EventCriteria { tags, date })
    }
}

fn validate_viewport(viewport: Viewport) -> Result<Viewport, Error> {
    let Viewport {
        north,
        south,
        east,
        west,
    } = viewport;
    if ![north, south, east, west].iter().all(|v| v.is_finite()) {
        return Err(Error::BadRequest(
            "viewport bounds must be finite numbers".to_string(),
        ));
    }
    if !(-90.0..=90.0).contains(&north) || !(-90.0..=90.0).contains(&south) {
        return Err(Error::BadRequest(
            "viewport latitudes must be within -90..90".to_string(),
        ));
    }
    if !(-180.0..=180.0).contains(&east) || !(-180.0..=180.0).contains(&west) {
        return Err(Error::BadRequest(
            "viewport longitudes must be within -180..180".to_string(),
        ));
    }
    if north < south {
        return Err(Error::BadRequest(format!(
            "viewport north ({}) is below south ({})",
            north, south
        )));
    }
    Ok(viewport)
}

fn validate_date_filter(filter: DateFilter) -> Result<Option<DateCriteria>, Error> {
    if let Some(year) = filter.year {
        if year < MIN_YEAR || year > MAX_YEAR {
            return Err(Error::BadRequest(format!(
                "Invalid year range ({}-{})",
                MIN_YEAR, MAX_YEAR
            )));
        }
        return Ok(Some(DateCriteria::Year(year)));
    }
    let start = non_empty(filter.start_date)
        .map(|s| parse_timestamp(&s, false))
        .transpose()?;
    let end = non_empty(filter.end_date)
        .map(|s| parse_timestamp(&s, true))
        .transpose()?;
    if start.is_none() && end.is_none() {
        return Ok(None);
    }
    Ok(Some(DateCriteria::Range { start, end }))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates. With
/// `end_of_day` a plain date means its last second.
///
/// # Errors
///
/// Returns `BadRequest` if the value is neither form.
pub fn parse_timestamp(value: &str, end_of_day: bool) -> Result<DateTime<Utc>, Error> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| Error::BadRequest(format!("invalid date: {}", value)))?;
    let time = if end_of_day {
        date.and_hms(23, 59, 59)
    } else {
        date.and_hms(0, 0, 0)
    };
    Ok(Utc.from_utc_datetime(&time))
}

/// A value bound to a positional placeholder.
#[derive(Clone, Debug, PartialEq)]
pub enum BindArg {
    Int(i32),
    Text(String),
    Timestamp(DateTime<Utc>),
    IntArray(Vec<i32>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum SqlPiece {
    Text(String),
    /// Index into the owning bind vector.
    Param(usize),
}

/// A SQL boolean expression over the event alias `e`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Fragment {
    pieces: Vec<SqlPiece>,
}

impl Fragment {
    #[must_use]
    pub fn pieces(&self) -> &[SqlPiece] {
        &self.pieces
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for piece in &self.pieces {
            match piece {
                SqlPiece::Text(text) => f.write_str(text)?,
                SqlPiece::Param(index) => write!(f, "${}", index + 1)?,
            }
        }
        Ok(())
    }
}

/// Collects fragments and the values they bind. The placeholder counter is
/// the length of `binds`.
#[derive(Debug, Default)]
pub struct QueryBuilder {
    binds: Vec<BindArg>,
    current: Vec<SqlPiece>,
}

impl QueryBuilder {
    pub fn push_sql(&mut self, sql: &str) -> &mut Self {
        match self.current.last_mut() {
            Some(SqlPiece::Text(text)) => text.push_str(sql),
            _ => self.current.push(SqlPiece::Text(sql.to_string())),
        }
        self
    }

    pub fn push_bind(&mut self, arg: BindArg) -> &mut Self {
        self.current.push(SqlPiece::Param(self.binds.len()));
        self.binds.push(arg);
        self
    }

    /// Closes the fragment under construction.
    pub fn finish_fragment(&mut self) -> Fragment {
        Fragment {
            pieces: std::mem::take(&mut self.current),
        }
    }

    #[must_use]
    pub fn into_binds(self) -> Vec<BindArg> {
        self.binds
    }
}

/// The in-memory bbox/date-envelope test applied during traversal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PruneWindow {
    pub viewport: Viewport,
    pub period: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl PruneWindow {
    #[must_use]
    pub fn new(viewport: Viewport, date: Option<&DateCriteria>) -> Self {
        Self {
            viewport,
            period: date.and_then(DateCriteria::period),
        }
    }

    /// Whether the cluster, and therefore possibly its subtree, may hold
    /// events inside the window. Clusters without a bounding box or date
    /// envelope never do.
    #[must_use]
    pub fn admits(&self, cluster: &ClusterRow) -> bool {
        let (min_lat, max_lat, min_lon, max_lon) = match (
            cluster.min_lat,
            cluster.max_lat,
            cluster.min_lon,
            cluster.max_lon,
        ) {
            (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
            _ => return false,
        };
        let v = &self.viewport;
        if max_lat < v.south || min_lat > v.north || max_lon < v.west || min_lon > v.east {
            return false;
        }
        let (min_date, max_date) = match (cluster.min_date, cluster.max_date) {
            (Some(min), Some(max)) => (min, max),
            _ => return false,
        };
        match self.period {
            Some((start, end)) => max_date >= start && min_date <= end,
            None => true,
        }
    }
}

/// Compiled predicates for one request.
#[derive(Clone, Debug)]
pub struct CompiledFilter {
    pub event_conditions: Vec<Fragment>,
    pub bind_args: Vec<BindArg>,
    pub post_filter: Option<PruneWindow>,
    criteria: EventCriteria,
}

impl CompiledFilter {
    #[must_use]
    pub fn for_clusters(request: &ClusterRequest) -> Self {
        let mut filter = Self::for_events(&request.criteria);
        filter.post_filter = Some(PruneWindow::new(
            request.viewport,
            request.criteria.date.as_ref(),
        ));
        filter
    }

    #[must_use]
    pub fn for_events(criteria: &EventCriteria) -> Self {
        let mut builder = QueryBuilder::default();
        let mut event_conditions = Vec::new();

        if let Some(tags) = &criteria.tags {
            match tags.operator {
                TagOperator::And => {
                    for tag in &tags.tags {
                        builder.push_sql(TAG_EXISTS_HEAD).push_sql(" AND tf.tag_name ILIKE ");
                        builder.push_bind(BindArg::Text(like_pattern(tag)));
                        builder.push_sql(")");
                        event_conditions.push(builder.finish_fragment());
                    }
                }
                TagOperator::Or => {
                    builder.push_sql(TAG_EXISTS_HEAD).push_sql(" AND (");
                    for (i, tag) in tags.tags.iter().enumerate() {
                        if i > 0 {
                            builder.push_sql(" OR ");
                        }
                        builder.push_sql("tf.tag_name ILIKE ");
                        builder.push_bind(BindArg::Text(like_pattern(tag)));
                    }
                    builder.push_sql("))");
                    event_conditions.push(builder.finish_fragment());
                }
            }
        }

        match criteria.date {
            Some(DateCriteria::Year(year)) => {
                builder.push_sql("EXTRACT(YEAR FROM e.date AT TIME ZONE 'UTC') = ");
                builder.push_bind(BindArg::Int(year));
                event_conditions.push(builder.finish_fragment());
            }
            Some(DateCriteria::Range { start, end }) => {
                if let Some(start) = start {
                    builder.push_sql("e.date >= ");
                    builder.push_bind(BindArg::Timestamp(start));
                    event_conditions.push(builder.finish_fragment());
                }
                if let Some(end) = end {
                    builder.push_sql("e.date <= ");
                    builder.push_bind(BindArg::Timestamp(end));
                    event_conditions.push(builder.finish_fragment());
                }
            }
            None => {}
        }

        Self {
            event_conditions,
            bind_args: builder.into_binds(),
            post_filter: None,
            criteria: criteria.clone(),
        }
    }

    #[must_use]
    pub fn criteria(&self) -> &EventCriteria {
        &self.criteria
    }

    #[must_use]
    pub fn has_event_conditions(&self) -> bool {
        !self.event_conditions.is_empty()
    }

    /// Clusters pass when there is no window to test against.
    #[must_use]
    pub fn admits(&self, cluster: &ClusterRow) -> bool {
        self.post_filter.map_or(true, |window| window.admits(cluster))
    }
}

const TAG_EXISTS_HEAD: &str = "EXISTS (SELECT 1 FROM eventtag etf \
     JOIN tag tf ON tf.tag_id = etf.tag_id WHERE etf.event_id = e.event_id";

/// Wraps a tag in `%…%` after escaping LIKE wildcards, giving a literal
/// case-insensitive substring match under ILIKE.
fn like_pattern(tag: &str) -> String {
    let mut pattern = String::with_capacity(tag.len() + 2);
    pattern.push('%');
    for c in tag.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

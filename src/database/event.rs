use actix_web::{
    web::{Data, Payload},
    HttpResponse,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{Array, Double, Integer, Nullable, Text, Timestamptz};
use log::warn;
use std::convert::TryFrom;

use super::schema::event;
use crate::database::*;
use crate::hierarchy::filter::{BindArg, CompiledFilter, EventFilter};
use crate::hierarchy::model::EventDetail;
use crate::hierarchy::{Engine, EventScope};
use crate::server::Settings;
use crate::worker::EventCoordinate;

pub(crate) async fn get_filtered_events(
    pool: Data<Pool>,
    settings: Data<Settings>,
    payload: Payload,
) -> Result<HttpResponse, actix_web::Error> {
    let bytes = load_payload(payload, settings.max_body_size).await?;
    let filter: EventFilter = if bytes.iter().all(u8::is_ascii_whitespace) {
        EventFilter::default()
    } else {
        serde_json::from_slice(&bytes).map_err(Error::from)?
    };
    let criteria = filter.validate()?;

    let deadline = settings.deadline();
    let engine = Engine::new(PgStore::new(pool.get_ref().clone()));
    let events = deadline
        .run(move || engine.filter_events(&criteria, deadline))
        .await?;
    Ok(success(None, events))
}

#[derive(Debug, QueryableByName)]
pub(crate) struct EventRecord {
    #[sql_type = "Nullable<Integer>"]
    event_id: Option<i32>,
    #[sql_type = "Nullable<Text>"]
    event_name: Option<String>,
    #[sql_type = "Nullable<Timestamptz>"]
    date: Option<DateTime<Utc>>,
    #[sql_type = "Nullable<Double>"]
    lat: Option<f64>,
    #[sql_type = "Nullable<Double>"]
    lon: Option<f64>,
    #[sql_type = "Nullable<Text>"]
    description: Option<String>,
    #[sql_type = "Nullable<Text>"]
    image: Option<String>,
    #[sql_type = "Nullable<Text>"]
    video: Option<String>,
    #[sql_type = "Nullable<Array<Text>>"]
    tags: Option<Vec<String>>,
    #[sql_type = "Nullable<Array<Integer>>"]
    clusters: Option<Vec<i32>>,
}

impl TryFrom<EventRecord> for EventDetail {
    type Error = String;

    fn try_from(record: EventRecord) -> Result<Self, Self::Error> {
        let event_id = record.event_id.ok_or("event_id is null")?;
        let missing = |column: &str| format!("event {}: {} is null", event_id, column);
        Ok(Self {
            event_id,
            event_name: record.event_name.ok_or_else(|| missing("event_name"))?,
            date: record.date.ok_or_else(|| missing("date"))?,
            lat: record.lat.ok_or_else(|| missing("lat"))?,
            lon: record.lon.ok_or_else(|| missing("lon"))?,
            description: record.description,
            image: record.image,
            video: record.video,
            tags: record.tags.unwrap_or_default(),
            clusters: record.clusters.unwrap_or_default(),
        })
    }
}

/// Events joined with their tag names and cluster ids. Listings of all
/// events come newest first.
pub(crate) fn event_details_query(scope: EventScope<'_>, filter: &CompiledFilter) -> DynamicQuery {
    let mut query = DynamicQuery::new(
        "SELECT e.event_id, e.event_name, e.date, e.lat, e.lon, e.description, e.image, e.video, \
         COALESCE(ARRAY_AGG(DISTINCT t.tag_name) FILTER (WHERE t.tag_name IS NOT NULL), '{}') \
         AS tags, \
         COALESCE(ARRAY_AGG(DISTINCT m.cluster_id) FILTER (WHERE m.cluster_id IS NOT NULL), '{}') \
         AS clusters \
         FROM event e \
         LEFT JOIN eventtag et ON et.event_id = e.event_id \
         LEFT JOIN tag t ON t.tag_id = et.tag_id \
         LEFT JOIN eventclustermap m ON m.event_id = e.event_id",
    );
    if let EventScope::Ids(ids) = scope {
        query
            .and_where()
            .sql("e.event_id = ANY(")
            .bind(BindArg::IntArray(ids.to_vec()))
            .sql(")");
    }
    query.conditions(&filter.event_conditions, &filter.bind_args);
    query.sql(" GROUP BY e.event_id");
    match scope {
        EventScope::Ids(_) => query.sql(" ORDER BY e.event_id"),
        EventScope::All => query.sql(" ORDER BY e.date DESC, e.event_id"),
    };
    query
}

pub(crate) fn load_event_details(
    conn: &PgConnection,
    scope: EventScope<'_>,
    filter: &CompiledFilter,
) -> Result<Vec<EventDetail>, Error> {
    let records = event_details_query(scope, filter).load::<EventRecord>(conn)?;
    Ok(records
        .into_iter()
        .filter_map(|record| match EventDetail::try_from(record) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("skipping event row: {}", e);
                None
            }
        })
        .collect())
}

pub(crate) fn load_event_coordinates(conn: &PgConnection) -> Result<Vec<EventCoordinate>, Error> {
    use event::dsl;

    let rows = dsl::event
        .select((dsl::event_id, dsl::lat, dsl::lon, dsl::date))
        .order(dsl::event_id)
        .load::<(i32, f64, f64, DateTime<Utc>)>(conn)?;
    Ok(rows
        .into_iter()
        .map(|(event_id, lat, lon, date)| EventCoordinate::new(event_id, lat, lon, date))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::filter::{EventCriteria, TagCriteria, TagOperator};

    #[test]
    fn leaf_hydration_binds_the_id_set_first() {
        let filter = CompiledFilter::for_events(&EventCriteria {
            tags: Some(TagCriteria {
                tags: vec!["war".into()],
                operator: TagOperator::Or,
            }),
            date: None,
        });
        let query = event_details_query(EventScope::Ids(&[3, 1]), &filter);
        let sql = query.to_string();
        assert!(sql.contains("WHERE e.event_id = ANY($1) AND EXISTS"));
        assert!(sql.contains("tf.tag_name ILIKE $2))"));
        assert!(sql.ends_with("GROUP BY e.event_id ORDER BY e.event_id"));
        assert_eq!(
            query.binds(),
            &[
                BindArg::IntArray(vec![3, 1]),
                BindArg::Text("%war%".into())
            ]
        );
    }

    #[test]
    fn unfiltered_listing_reads_every_event_newest_first() {
        let filter = CompiledFilter::for_events(&EventCriteria::default());
        let query = event_details_query(EventScope::All, &filter);
        let sql = query.to_string();
        assert!(!sql.contains("WHERE"));
        assert!(sql.ends_with("GROUP BY e.event_id ORDER BY e.date DESC, e.event_id"));
        assert!(query.binds().is_empty());
    }

    #[test]
    fn aggregates_drop_null_joins() {
        let filter = CompiledFilter::for_events(&EventCriteria::default());
        let sql = event_details_query(EventScope::All, &filter).to_string();
        assert!(sql.contains("FILTER (WHERE t.tag_name IS NOT NULL), '{}') AS tags"));
        assert!(sql.contains("FILTER (WHERE m.cluster_id IS NOT NULL), '{}') AS clusters"));
    }

    #[test]
    fn records_missing_dates_are_rejected() {
        let record = EventRecord {
            event_id: Some(4),
            event_name: Some("x".into()),
            date: None,
            lat: Some(0.0),
            lon: Some(0.0),
            description: None,
            image: None,
            video: None,
            tags: None,
            clusters: None,
        };
        assert_eq!(
            EventDetail::try_from(record).unwrap_err(),
            "event 4: date is null"
        );
    }
}

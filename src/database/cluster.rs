use actix_web::{
    http,
    web::{Data, Payload},
    HttpResponse,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{Array, Double, Integer, Nullable, Timestamptz};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::convert::TryFrom;

use super::schema::{cluster, eventclustermap};
use crate::database::*;
use crate::deadline::run_blocking;
use crate::hierarchy::filter::{parse_timestamp, BindArg, ClusterQuery, CompiledFilter};
use crate::hierarchy::model::{parse_days, ClusterRow, MAX_LEVEL};
use crate::hierarchy::{ClusterLoad, Engine};
use crate::server::Settings;
use crate::worker::WorkerClient;

const CLUSTER_CHUNK: usize = 1000;
const MAPPING_CHUNK: usize = 5000;

pub(crate) async fn get_hierarchical_clusters(
    pool: Data<Pool>,
    settings: Data<Settings>,
    payload: Payload,
) -> Result<HttpResponse, actix_web::Error> {
    let bytes = load_payload(payload, settings.max_body_size).await?;
    let query: ClusterQuery = serde_json::from_slice(&bytes).map_err(Error::from)?;
    let request = query.validate()?;

    let deadline = settings.deadline();
    let engine = Engine::new(PgStore::new(pool.get_ref().clone()));
    let clusters = deadline
        .run(move || engine.hierarchical_clusters(&request, deadline))
        .await?;
    Ok(success(None, clusters))
}

pub(crate) async fn insert_clusters(
    pool: Data<Pool>,
    settings: Data<Settings>,
    payload: Payload,
) -> Result<HttpResponse, actix_web::Error> {
    let bytes = load_payload(payload, settings.max_body_size).await?;
    let definitions: Vec<ClusterDefinition> =
        serde_json::from_slice(&bytes).map_err(Error::from)?;
    let summary = ingest(pool.get_ref().clone(), definitions).await?;
    Ok(success(Some("Clusters inserted successfully"), summary))
}

/// Sends every event coordinate to the clustering worker and stores the
/// tree it returns.
pub(crate) async fn rebuild_clusters(
    pool: Data<Pool>,
    worker: Data<WorkerClient>,
) -> Result<HttpResponse, actix_web::Error> {
    let conn_pool = pool.get_ref().clone();
    let coordinates = run_blocking(move || {
        let conn = conn_pool.get()?;
        load_event_coordinates(&conn)
    })
    .await?;
    if coordinates.is_empty() {
        return Ok(success(Some("No events to cluster"), IngestSummary::default()));
    }

    info!("sending {} events to the clustering worker", coordinates.len());
    let definitions = worker.process(&coordinates).await?;
    info!("clustering worker returned {} clusters", definitions.len());
    let summary = ingest(pool.get_ref().clone(), definitions).await?;
    Ok(success(Some("Clusters rebuilt successfully"), summary))
}

pub(crate) async fn get_event_cluster_mapping(
    pool: Data<Pool>,
    settings: Data<Settings>,
) -> Result<HttpResponse, actix_web::Error> {
    let rows = read_mappings(pool, &settings).await?;
    Ok(success(None, rows))
}

pub(crate) async fn get_event_cluster_mapping_csv(
    pool: Data<Pool>,
    settings: Data<Settings>,
) -> Result<HttpResponse, actix_web::Error> {
    let rows = read_mappings(pool, &settings).await?;
    Ok(HttpResponse::Ok()
        .header(http::header::CONTENT_TYPE, "text/csv")
        .header(
            http::header::CONTENT_DISPOSITION,
            "attachment; filename=event_cluster_mapping.csv",
        )
        .body(mapping_csv(&rows)))
}

async fn read_mappings(pool: Data<Pool>, settings: &Settings) -> Result<Vec<MappingRow>, Error> {
    let deadline = settings.deadline();
    let store = PgStore::new(pool.get_ref().clone());
    deadline
        .run(move || store.read(deadline, load_mappings))
        .await
}

#[derive(Debug, QueryableByName)]
pub(crate) struct ClusterRecord {
    #[sql_type = "Nullable<Integer>"]
    cluster_id: Option<i32>,
    #[sql_type = "Nullable<Integer>"]
    parent_cluster_id: Option<i32>,
    #[sql_type = "Nullable<Double>"]
    centroid_lat: Option<f64>,
    #[sql_type = "Nullable<Double>"]
    centroid_lon: Option<f64>,
    #[sql_type = "Nullable<Double>"]
    centroid_time_days: Option<f64>,
    #[sql_type = "Nullable<Integer>"]
    level: Option<i32>,
    #[sql_type = "Nullable<Double>"]
    min_lat: Option<f64>,
    #[sql_type = "Nullable<Double>"]
    max_lat: Option<f64>,
    #[sql_type = "Nullable<Double>"]
    min_lon: Option<f64>,
    #[sql_type = "Nullable<Double>"]
    max_lon: Option<f64>,
    #[sql_type = "Nullable<Timestamptz>"]
    min_date: Option<DateTime<Utc>>,
    #[sql_type = "Nullable<Timestamptz>"]
    max_date: Option<DateTime<Utc>>,
    #[sql_type = "Nullable<Array<Integer>>"]
    event_ids: Option<Vec<i32>>,
}

impl TryFrom<ClusterRecord> for ClusterRow {
    type Error = String;

    fn try_from(record: ClusterRecord) -> Result<Self, Self::Error> {
        let cluster_id = record.cluster_id.ok_or("cluster_id is null")?;
        let missing = |column: &str| format!("cluster {}: {} is null", cluster_id, column);
        Ok(Self {
            cluster_id,
            parent_cluster_id: record.parent_cluster_id,
            centroid_lat: record.centroid_lat.ok_or_else(|| missing("centroid_lat"))?,
            centroid_lon: record.centroid_lon.ok_or_else(|| missing("centroid_lon"))?,
            centroid_time_days: record.centroid_time_days,
            level: record.level.ok_or_else(|| missing("level"))?,
            min_lat: record.min_lat,
            max_lat: record.max_lat,
            min_lon: record.min_lon,
            max_lon: record.max_lon,
            min_date: record.min_date,
            max_date: record.max_date,
            event_ids: record.event_ids.unwrap_or_default(),
        })
    }
}

/// Every cluster up to `max_level` with its distinct member ids. Event
/// conditions narrow the set to clusters with a matching member.
pub(crate) fn cluster_index_query(max_level: i32, filter: &CompiledFilter) -> DynamicQuery {
    let mut query = DynamicQuery::new(
        "SELECT c.cluster_id, c.parent_cluster_id, c.centroid_lat, c.centroid_lon, \
         c.centroid_time_days, c.level, c.min_lat, c.max_lat, c.min_lon, c.max_lon, \
         c.min_date, c.max_date, \
         COALESCE(ARRAY_AGG(DISTINCT m.event_id) FILTER (WHERE m.event_id IS NOT NULL), '{}') \
         AS event_ids \
         FROM cluster c LEFT JOIN eventclustermap m ON m.cluster_id = c.cluster_id",
    );
    query
        .and_where()
        .sql("c.level <= ")
        .bind(BindArg::Int(max_level));
    if filter.has_event_conditions() {
        query.and_where().sql(
            "EXISTS (SELECT 1 FROM eventclustermap fm JOIN event e ON e.event_id = fm.event_id \
             WHERE fm.cluster_id = c.cluster_id",
        );
        for condition in &filter.event_conditions {
            query.sql(" AND ").fragment(condition, &filter.bind_args);
        }
        query.sql(")");
    }
    query.sql(" GROUP BY c.cluster_id");
    query
}

pub(crate) fn load_cluster_index(
    conn: &PgConnection,
    max_level: i32,
    filter: &CompiledFilter,
) -> Result<ClusterLoad, Error> {
    let records = cluster_index_query(max_level, filter).load::<ClusterRecord>(conn)?;
    let mut load = ClusterLoad::default();
    for record in records {
        match ClusterRow::try_from(record) {
            Ok(row) => load.rows.push(row),
            Err(e) => {
                warn!("skipping cluster row: {}", e);
                load.skipped += 1;
            }
        }
    }
    Ok(load)
}

/// `centroid_time_days` as sent by clients: days since the epoch or a
/// `YYYY-MM-DD` date.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CentroidTime {
    Days(f64),
    Date(String),
}

impl CentroidTime {
    fn days(&self) -> Result<Option<f64>, String> {
        match self {
            Self::Days(days) if days.is_finite() => Ok(Some(*days)),
            Self::Days(days) => Err(format!("centroid_time_days is not finite: {}", days)),
            Self::Date(date) if date.trim().is_empty() => Ok(None),
            Self::Date(date) => parse_days(date)
                .map(Some)
                .ok_or_else(|| format!("centroid_time_days is not a date: {}", date)),
        }
    }
}

/// One node of a cluster tree as produced by the clustering worker.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ClusterDefinition {
    pub cluster_id: i32,
    #[serde(default)]
    pub parent_cluster_id: Option<i32>,
    pub centroid_lat: f64,
    pub centroid_lon: f64,
    #[serde(default)]
    pub centroid_time_days: Option<CentroidTime>,
    pub level: i32,
    #[serde(default)]
    pub min_lat: Option<f64>,
    #[serde(default)]
    pub max_lat: Option<f64>,
    #[serde(default)]
    pub min_lon: Option<f64>,
    #[serde(default)]
    pub max_lon: Option<f64>,
    #[serde(default)]
    pub min_date: Option<String>,
    #[serde(default)]
    pub max_date: Option<String>,
    #[serde(default)]
    pub event_ids: Vec<i32>,
}

#[derive(Debug, Insertable, PartialEq)]
#[table_name = "cluster"]
pub(crate) struct NewCluster {
    cluster_id: i32,
    parent_cluster_id: Option<i32>,
    centroid_lat: f64,
    centroid_lon: f64,
    centroid_time_days: Option<f64>,
    level: i32,
    min_lat: Option<f64>,
    max_lat: Option<f64>,
    min_lon: Option<f64>,
    max_lon: Option<f64>,
    min_date: Option<DateTime<Utc>>,
    max_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Insertable, PartialEq)]
#[table_name = "eventclustermap"]
pub(crate) struct NewMapping {
    event_id: i32,
    cluster_id: i32,
}

/// Validated clusters ordered parents first, with their mapping rows.
#[derive(Debug)]
pub(crate) struct ClusterBatch {
    clusters: Vec<NewCluster>,
    mappings: Vec<NewMapping>,
}

#[derive(Debug, Default, PartialEq, Serialize)]
pub(crate) struct IngestSummary {
    clusters_inserted: usize,
    mappings_inserted: usize,
}

fn optional_timestamp(value: Option<&str>, end_of_day: bool) -> Result<Option<DateTime<Utc>>, Error> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_timestamp(value, end_of_day).map(Some),
    }
}

fn check_coordinate(cluster_id: i32, name: &str, value: Option<f64>) -> Result<(), Error> {
    match value {
        Some(v) if !v.is_finite() => Err(Error::BadRequest(format!(
            "cluster {}: {} is not finite",
            cluster_id, name
        ))),
        _ => Ok(()),
    }
}

pub(crate) fn validate_definitions(
    definitions: Vec<ClusterDefinition>,
) -> Result<ClusterBatch, Error> {
    let levels: HashMap<i32, i32> = definitions
        .iter()
        .rev()
        .map(|d| (d.cluster_id, d.level))
        .collect();
    let mut seen = HashSet::new();
    let mut clusters = Vec::with_capacity(definitions.len());
    let mut mappings = Vec::new();

    for definition in definitions {
        let id = definition.cluster_id;
        if !seen.insert(id) {
            warn!("ignoring repeated definition of cluster {}", id);
            continue;
        }
        if definition.level < 0 || definition.level > MAX_LEVEL {
            return Err(Error::BadRequest(format!(
                "cluster {}: level must be between 0 and {} (got {})",
                id, MAX_LEVEL, definition.level
            )));
        }
        if !definition.centroid_lat.is_finite() || !definition.centroid_lon.is_finite() {
            return Err(Error::BadRequest(format!(
                "cluster {}: centroid is not finite",
                id
            )));
        }
        match definition.parent_cluster_id {
            Some(parent) if parent == id => {
                return Err(Error::BadRequest(format!(
                    "cluster {} is its own parent",
                    id
                )))
            }
            Some(parent) => {
                if let Some(&parent_level) = levels.get(&parent) {
                    if definition.level != parent_level + 1 {
                        return Err(Error::BadRequest(format!(
                            "cluster {}: level {} does not follow parent {} at level {}",
                            id, definition.level, parent, parent_level
                        )));
                    }
                }
            }
            None if definition.level != 0 => {
                return Err(Error::BadRequest(format!(
                    "cluster {}: only level 0 clusters may omit a parent",
                    id
                )))
            }
            None => {}
        }
        check_coordinate(id, "min_lat", definition.min_lat)?;
        check_coordinate(id, "max_lat", definition.max_lat)?;
        check_coordinate(id, "min_lon", definition.min_lon)?;
        check_coordinate(id, "max_lon", definition.max_lon)?;
        let centroid_time_days = match &definition.centroid_time_days {
            Some(time) => time
                .days()
                .map_err(|e| Error::BadRequest(format!("cluster {}: {}", id, e)))?,
            None => None,
        };

        let members: BTreeSet<i32> = definition.event_ids.iter().copied().collect();
        mappings.extend(members.into_iter().map(|event_id| NewMapping {
            event_id,
            cluster_id: id,
        }));
        clusters.push(NewCluster {
            cluster_id: id,
            parent_cluster_id: definition.parent_cluster_id,
            centroid_lat: definition.centroid_lat,
            centroid_lon: definition.centroid_lon,
            centroid_time_days,
            level: definition.level,
            min_lat: definition.min_lat,
            max_lat: definition.max_lat,
            min_lon: definition.min_lon,
            max_lon: definition.max_lon,
            min_date: optional_timestamp(definition.min_date.as_deref(), false)?,
            max_date: optional_timestamp(definition.max_date.as_deref(), true)?,
        });
    }

    clusters.sort_by_key(|c| c.level);
    Ok(ClusterBatch { clusters, mappings })
}

async fn ingest(pool: Pool, definitions: Vec<ClusterDefinition>) -> Result<IngestSummary, Error> {
    let batch = validate_definitions(definitions)?;
    run_blocking(move || {
        let conn = pool.get()?;
        insert_cluster_batch(&conn, &batch)
    })
    .await
}

/// Inserts clusters and mappings, skipping rows that already exist, then
/// recomputes envelopes so every cluster covers its members and children.
pub(crate) fn insert_cluster_batch(
    conn: &PgConnection,
    batch: &ClusterBatch,
) -> Result<IngestSummary, Error> {
    conn.transaction::<_, Error, _>(|| {
        let mut summary = IngestSummary::default();
        for chunk in batch.clusters.chunks(CLUSTER_CHUNK) {
            summary.clusters_inserted += diesel::insert_into(cluster::table)
                .values(chunk)
                .on_conflict(cluster::cluster_id)
                .do_nothing()
                .execute(conn)?;
        }
        for chunk in batch.mappings.chunks(MAPPING_CHUNK) {
            summary.mappings_inserted += diesel::insert_into(eventclustermap::table)
                .values(chunk)
                .on_conflict((eventclustermap::event_id, eventclustermap::cluster_id))
                .do_nothing()
                .execute(conn)?;
        }

        let ids: Vec<i32> = batch.clusters.iter().map(|c| c.cluster_id).collect();
        refresh_envelopes(conn, &ids)?;
        info!(
            "inserted {} clusters and {} mappings",
            summary.clusters_inserted, summary.mappings_inserted
        );
        Ok(summary)
    })
}

const MEMBER_ENVELOPE_SQL: &str = "UPDATE cluster c SET \
     min_lat = LEAST(c.min_lat, s.min_lat), max_lat = GREATEST(c.max_lat, s.max_lat), \
     min_lon = LEAST(c.min_lon, s.min_lon), max_lon = GREATEST(c.max_lon, s.max_lon), \
     min_date = LEAST(c.min_date, s.min_date), max_date = GREATEST(c.max_date, s.max_date), \
     centroid_time_days = COALESCE(c.centroid_time_days, s.mean_days) \
     FROM (SELECT m.cluster_id, MIN(e.lat) AS min_lat, MAX(e.lat) AS max_lat, \
     MIN(e.lon) AS min_lon, MAX(e.lon) AS max_lon, MIN(e.date) AS min_date, \
     MAX(e.date) AS max_date, AVG(EXTRACT(EPOCH FROM e.date) / 86400.0) AS mean_days \
     FROM eventclustermap m JOIN event e ON e.event_id = m.event_id \
     WHERE m.cluster_id = ANY($1) GROUP BY m.cluster_id) s \
     WHERE c.cluster_id = s.cluster_id";

const CHILD_ENVELOPE_SQL: &str = "UPDATE cluster p SET \
     min_lat = LEAST(p.min_lat, s.min_lat), max_lat = GREATEST(p.max_lat, s.max_lat), \
     min_lon = LEAST(p.min_lon, s.min_lon), max_lon = GREATEST(p.max_lon, s.max_lon), \
     min_date = LEAST(p.min_date, s.min_date), max_date = GREATEST(p.max_date, s.max_date) \
     FROM (SELECT parent_cluster_id AS cluster_id, MIN(min_lat) AS min_lat, \
     MAX(max_lat) AS max_lat, MIN(min_lon) AS min_lon, MAX(max_lon) AS max_lon, \
     MIN(min_date) AS min_date, MAX(max_date) AS max_date \
     FROM cluster WHERE level = $1 AND parent_cluster_id IS NOT NULL \
     GROUP BY parent_cluster_id) s \
     WHERE p.cluster_id = s.cluster_id";

/// Folds member events into the given clusters' envelopes, then rolls every
/// level's envelopes up into their parents, deepest level first.
fn refresh_envelopes(conn: &PgConnection, ids: &[i32]) -> Result<(), Error> {
    if ids.is_empty() {
        return Ok(());
    }
    diesel::sql_query(MEMBER_ENVELOPE_SQL)
        .bind::<Array<Integer>, _>(ids)
        .execute(conn)?;
    for level in (1..=MAX_LEVEL).rev() {
        diesel::sql_query(CHILD_ENVELOPE_SQL)
            .bind::<Integer, _>(level)
            .execute(conn)?;
    }
    Ok(())
}

#[derive(Debug, PartialEq, Queryable, Serialize)]
pub(crate) struct MappingRow {
    event_id: i32,
    cluster_id: i32,
    parent_cluster_id: Option<i32>,
}

pub(crate) fn load_mappings(conn: &PgConnection) -> Result<Vec<MappingRow>, Error> {
    Ok(eventclustermap::table
        .inner_join(cluster::table)
        .select((
            eventclustermap::event_id,
            eventclustermap::cluster_id,
            cluster::parent_cluster_id,
        ))
        .order((eventclustermap::event_id, eventclustermap::cluster_id))
        .load::<MappingRow>(conn)?)
}

pub(crate) fn mapping_csv(rows: &[MappingRow]) -> String {
    let mut csv = String::from("event_id,cluster_id,parent_cluster_id\n");
    for row in rows {
        let parent = row
            .parent_cluster_id
            .map(|p| p.to_string())
            .unwrap_or_default();
        csv.push_str(&format!("{},{},{}\n", row.event_id, row.cluster_id, parent));
    }
    csv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::filter::{DateCriteria, EventCriteria};
    use serde_json::json;

    fn definitions(body: serde_json::Value) -> Vec<ClusterDefinition> {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn plain_index_query_has_only_the_level_bound() {
        let filter = CompiledFilter::for_events(&EventCriteria::default());
        let query = cluster_index_query(3, &filter);
        let sql = query.to_string();
        assert!(sql.contains("WHERE c.level <= $1 GROUP BY c.cluster_id"));
        assert!(!sql.contains("EXISTS"));
        assert_eq!(query.binds(), &[BindArg::Int(3)]);
    }

    #[test]
    fn event_conditions_narrow_the_index_through_members() {
        let filter = CompiledFilter::for_events(&EventCriteria {
            tags: None,
            date: Some(DateCriteria::Year(2021)),
        });
        let query = cluster_index_query(4, &filter);
        let sql = query.to_string();
        assert!(sql.contains(
            "WHERE c.level <= $1 AND EXISTS (SELECT 1 FROM eventclustermap fm \
             JOIN event e ON e.event_id = fm.event_id WHERE fm.cluster_id = c.cluster_id \
             AND EXTRACT(YEAR FROM e.date AT TIME ZONE 'UTC') = $2)"
        ));
        assert_eq!(query.binds(), &[BindArg::Int(4), BindArg::Int(2021)]);
    }

    #[test]
    fn records_with_null_required_columns_are_rejected() {
        let record = ClusterRecord {
            cluster_id: Some(7),
            parent_cluster_id: None,
            centroid_lat: Some(1.0),
            centroid_lon: None,
            centroid_time_days: None,
            level: Some(0),
            min_lat: None,
            max_lat: None,
            min_lon: None,
            max_lon: None,
            min_date: None,
            max_date: None,
            event_ids: None,
        };
        let err = ClusterRow::try_from(record).unwrap_err();
        assert!(err.contains("centroid_lon"));
    }

    #[test]
    fn centroid_time_accepts_days_or_dates() {
        let batch = validate_definitions(definitions(json!([
            {"cluster_id": 1, "centroid_lat": 1.0, "centroid_lon": 2.0,
             "centroid_time_days": "2023-06-15", "level": 0, "event_ids": [3, 1, 3]},
            {"cluster_id": 2, "parent_cluster_id": 1, "centroid_lat": 1.0, "centroid_lon": 2.0,
             "centroid_time_days": 42.5, "level": 1},
            {"cluster_id": 3, "parent_cluster_id": 1, "centroid_lat": 1.0, "centroid_lon": 2.0,
             "centroid_time_days": "", "level": 1}
        ])))
        .unwrap();
        assert_eq!(batch.clusters[0].centroid_time_days, Some(19523.0));
        assert_eq!(batch.clusters[1].centroid_time_days, Some(42.5));
        assert_eq!(batch.clusters[2].centroid_time_days, None);
        assert_eq!(
            batch.mappings,
            vec![
                NewMapping { event_id: 1, cluster_id: 1 },
                NewMapping { event_id: 3, cluster_id: 1 }
            ]
        );
    }

    #[test]
    fn parents_are_inserted_before_children() {
        let batch = validate_definitions(definitions(json!([
            {"cluster_id": 5, "parent_cluster_id": 4, "centroid_lat": 0.0, "centroid_lon": 0.0, "level": 2},
            {"cluster_id": 4, "parent_cluster_id": 1, "centroid_lat": 0.0, "centroid_lon": 0.0, "level": 1},
            {"cluster_id": 1, "centroid_lat": 0.0, "centroid_lon": 0.0, "level": 0}
        ])))
        .unwrap();
        let order: Vec<i32> = batch.clusters.iter().map(|c| c.cluster_id).collect();
        assert_eq!(order, vec![1, 4, 5]);
    }

    #[test]
    fn malformed_definitions_are_rejected() {
        let cases = vec![
            json!([{"cluster_id": 1, "centroid_lat": 0.0, "centroid_lon": 0.0, "level": 5}]),
            json!([{"cluster_id": 1, "parent_cluster_id": 1, "centroid_lat": 0.0, "centroid_lon": 0.0, "level": 1}]),
            json!([{"cluster_id": 1, "centroid_lat": 0.0, "centroid_lon": 0.0, "level": 2}]),
            json!([
                {"cluster_id": 1, "centroid_lat": 0.0, "centroid_lon": 0.0, "level": 0},
                {"cluster_id": 2, "parent_cluster_id": 1, "centroid_lat": 0.0, "centroid_lon": 0.0, "level": 3}
            ]),
            json!([{"cluster_id": 1, "centroid_lat": 0.0, "centroid_lon": 0.0, "level": 0,
                    "centroid_time_days": "June"}]),
            json!([{"cluster_id": 1, "centroid_lat": 0.0, "centroid_lon": 0.0, "level": 0,
                    "min_date": "sometime"}]),
        ];
        for body in cases {
            let result = validate_definitions(definitions(body.clone()));
            assert!(matches!(result, Err(Error::BadRequest(_))), "{}", body);
        }
    }

    #[test]
    fn repeated_cluster_ids_keep_the_first_definition() {
        let batch = validate_definitions(definitions(json!([
            {"cluster_id": 1, "centroid_lat": 1.0, "centroid_lon": 0.0, "level": 0},
            {"cluster_id": 1, "centroid_lat": 9.0, "centroid_lon": 0.0, "level": 0}
        ])))
        .unwrap();
        assert_eq!(batch.clusters.len(), 1);
        assert_eq!(batch.clusters[0].centroid_lat, 1.0);
    }

    #[test]
    fn worker_fields_we_do_not_store_are_ignored() {
        let parsed = definitions(json!([{
            "cluster_id": 1, "centroid_lat": 0.0, "centroid_lon": 0.0, "level": 0,
            "group_tag": "g", "bounding_box": "0,0,1,1", "min_date": "2020-01-01",
            "max_date": "2020-12-31T12:00:00Z"
        }]));
        let batch = validate_definitions(parsed).unwrap();
        assert_eq!(
            batch.clusters[0].max_date,
            "2020-12-31T12:00:00Z".parse().ok()
        );
        assert_eq!(
            batch.clusters[0].min_date,
            "2020-01-01T00:00:00Z".parse().ok()
        );
    }

    #[test]
    fn csv_leaves_missing_parents_empty() {
        let rows = vec![
            MappingRow {
                event_id: 1,
                cluster_id: 10,
                parent_cluster_id: None,
            },
            MappingRow {
                event_id: 1,
                cluster_id: 11,
                parent_cluster_id: Some(10),
            },
        ];
        assert_eq!(
            mapping_csv(&rows),
            "event_id,cluster_id,parent_cluster_id\n1,10,\n1,11,10\n"
        );
    }
}

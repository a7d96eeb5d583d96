use actix_web::{
    web::{BytesMut, Payload},
    HttpResponse,
};
use diesel::prelude::*;
use diesel::r2d2::ConnectionManager;
use futures::StreamExt;
use serde::Serialize;

mod cluster;
mod event;
mod query;
pub(crate) mod schema;

pub(crate) use self::cluster::*;
pub use self::cluster::{CentroidTime, ClusterDefinition};
pub(crate) use self::event::*;
pub(crate) use self::query::*;

use crate::deadline::Deadline;
pub use crate::error::Error;
use crate::hierarchy::filter::CompiledFilter;
use crate::hierarchy::model::EventDetail;
use crate::hierarchy::{ClusterLoad, ClusterStore, EventScope};

pub type Pool = r2d2::Pool<ConnectionManager<PgConnection>>;

/// Postgres-backed cluster store sharing the process connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Runs `f` in a read-only transaction that Postgres cancels once the
    /// deadline passes.
    fn read<T, F>(&self, deadline: Deadline, f: F) -> Result<T, Error>
    where
        F: FnOnce(&PgConnection) -> Result<T, Error>,
    {
        let conn = self.pool.get()?;
        let timeout = deadline.remaining_millis()?;
        conn.build_transaction().read_only().run(|| {
            diesel::sql_query(format!("SET LOCAL statement_timeout = {}", timeout))
                .execute(&*conn)?;
            f(&*conn)
        })
    }
}

impl ClusterStore for PgStore {
    fn load_clusters(
        &self,
        max_level: i32,
        filter: &CompiledFilter,
        deadline: Deadline,
    ) -> Result<ClusterLoad, Error> {
        self.read(deadline, |conn| load_cluster_index(conn, max_level, filter))
    }

    fn hydrate_events(
        &self,
        scope: EventScope<'_>,
        filter: &CompiledFilter,
        deadline: Deadline,
    ) -> Result<Vec<EventDetail>, Error> {
        self.read(deadline, |conn| load_event_details(conn, scope, filter))
    }
}

/// Reads the whole request body, refusing anything larger than `limit`.
pub(crate) async fn load_payload(mut payload: Payload, limit: usize) -> Result<BytesMut, Error> {
    let mut body = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| Error::BadRequest(format!("failed to read body: {}", e)))?;
        if body.len() + chunk.len() > limit {
            return Err(Error::BadRequest(format!(
                "request body exceeds {} bytes",
                limit
            )));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

#[derive(Debug, Serialize)]
struct Success<'a, T> {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    data: T,
}

pub(crate) fn success<T: Serialize>(message: Option<&str>, data: T) -> HttpResponse {
    HttpResponse::Ok().json(Success {
        status: "success",
        message,
        data,
    })
}

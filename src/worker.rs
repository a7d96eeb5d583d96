//! Client for the external clustering worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::database::ClusterDefinition;
use crate::error::Error;

/// One event as the worker expects it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventCoordinate {
    #[serde(rename = "EventID")]
    pub event_id: i32,
    #[serde(rename = "Lat")]
    pub lat: f64,
    #[serde(rename = "Lon")]
    pub lon: f64,
    #[serde(rename = "Date")]
    pub date: DateTime<Utc>,
}

impl EventCoordinate {
    /// NaN coordinates are sent as 0.
    #[must_use]
    pub fn new(event_id: i32, lat: f64, lon: f64, date: DateTime<Utc>) -> Self {
        Self {
            event_id,
            lat: if lat.is_nan() { 0.0 } else { lat },
            lon: if lon.is_nan() { 0.0 } else { lon },
            date,
        }
    }
}

#[derive(Serialize)]
struct ProcessRequest<'a> {
    events: &'a [EventCoordinate],
}

#[derive(Deserialize)]
struct ProcessReply {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<ProcessData>,
}

#[derive(Deserialize)]
struct ProcessData {
    #[serde(default)]
    clusters: Vec<ClusterDefinition>,
}

pub struct WorkerClient {
    client: reqwest::Client,
    process_url: Url,
}

impl WorkerClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or `base` cannot
    /// carry a path.
    pub fn new(base: &Url, timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("cannot build worker client: {}", e)))?;
        Ok(Self {
            client,
            process_url: process_url(base)?,
        })
    }

    #[must_use]
    pub fn process_url(&self) -> &Url {
        &self.process_url
    }

    /// Posts the events to the worker and returns the cluster tree it built.
    ///
    /// # Errors
    ///
    /// Returns `Worker` if the worker is unreachable, answers with an error
    /// status, or sends a reply that does not decode.
    pub async fn process(
        &self,
        events: &[EventCoordinate],
    ) -> Result<Vec<ClusterDefinition>, Error> {
        let response = self
            .client
            .post(self.process_url.clone())
            .json(&ProcessRequest { events })
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::Worker(format!("{}: {}", self.process_url, e)))?;
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Worker(format!("{}: {}", self.process_url, e)))?;
        parse_reply(&body)
    }
}

fn process_url(base: &Url) -> Result<Url, Error> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("process")
        .map_err(|e| Error::Internal(format!("invalid worker URL {}: {}", base, e)))
}

fn parse_reply(body: &[u8]) -> Result<Vec<ClusterDefinition>, Error> {
    let reply: ProcessReply = serde_json::from_slice(body)
        .map_err(|e| Error::Worker(format!("undecodable reply: {}", e)))?;
    if reply.status != "success" {
        return Err(Error::Worker(format!(
            "worker reported {}: {}",
            reply.status,
            reply.message.unwrap_or_default()
        )));
    }
    reply
        .data
        .map(|data| data.clusters)
        .ok_or_else(|| Error::Worker("reply carries no data".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn process_url_keeps_the_base_path() {
        let url = process_url(&Url::parse("http://localhost:8000").unwrap()).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/process");
        let url = process_url(&Url::parse("http://worker/api").unwrap()).unwrap();
        assert_eq!(url.as_str(), "http://worker/api/process");
        let url = process_url(&Url::parse("http://worker/api/").unwrap()).unwrap();
        assert_eq!(url.as_str(), "http://worker/api/process");
    }

    #[test]
    fn coordinates_use_the_worker_field_names() {
        let date = Utc.ymd(2023, 6, 15).and_hms(0, 0, 0);
        let value = serde_json::to_value(EventCoordinate::new(7, f64::NAN, 100.5, date)).unwrap();
        assert_eq!(value["EventID"], 7);
        assert_eq!(value["Lat"], 0.0);
        assert_eq!(value["Lon"], 100.5);
        assert_eq!(value["Date"], "2023-06-15T00:00:00Z");
    }

    #[test]
    fn successful_reply_yields_clusters() {
        let body = br#"{"status":"success","data":{"clusters":[
            {"cluster_id":1,"parent_cluster_id":null,"centroid_lat":1.0,"centroid_lon":2.0,
             "centroid_time_days":"2023-06-15","level":0,"event_ids":[1,2]}
        ]}}"#;
        let clusters = parse_reply(body).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].event_ids, vec![1, 2]);
    }

    #[test]
    fn failed_or_garbled_replies_are_worker_errors() {
        let cases: Vec<&[u8]> = vec![
            br#"{"status":"error","message":"Body is empty"}"#,
            br#"{"status":"success"}"#,
            b"<html>",
        ];
        for body in cases {
            assert!(matches!(parse_reply(body), Err(Error::Worker(_))));
        }
    }

    #[actix_rt::test]
    async fn unreachable_worker_is_a_worker_error() {
        let base = Url::parse("http://127.0.0.1:9").unwrap();
        let client = WorkerClient::new(&base, Duration::from_secs(2)).unwrap();
        let date = Utc.ymd(2023, 6, 15).and_hms(0, 0, 0);
        let result = client
            .process(&[EventCoordinate::new(1, 0.0, 0.0, date)])
            .await;
        assert!(matches!(result, Err(Error::Worker(_))));
    }
}

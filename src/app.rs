use crate::server;
use actix_web::dev::Server;
use anyhow::{Context, Result};
use clap::{App, Arg};
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

const DEFAULT_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_PY_PORT: u16 = 8000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_WORKER_TIMEOUT_SECS: u64 = 60;
const DEFAULT_POOL_MAX_SIZE: u32 = 10;
const DEFAULT_POOL_TIMEOUT_SECS: u64 = 5;
const DEFAULT_MAX_BODY_SIZE: usize = 1_048_576;

/// Process configuration read from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub addr: SocketAddr,
    pub worker_url: Url,
    pub request_timeout: Duration,
    pub worker_timeout: Duration,
    pub pool_max_size: u32,
    pub pool_timeout: Duration,
    pub max_body_size: usize,
}

impl Config {
    /// Builds the configuration from a variable lookup. Optional values that
    /// fail to parse fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Fails if `DATABASE_URL` is missing or the listener address or worker
    /// URL is malformed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL is not set")?;
        let addr = lookup("GLOBE_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let addr = addr
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid IP address/port for globe: {}", addr))?;
        let worker_url = match lookup("WORKER_URL") {
            Some(url) => url,
            None => {
                let port = lookup("PY_PORT")
                    .and_then(|v| v.parse::<u16>().ok())
                    .unwrap_or(DEFAULT_PY_PORT);
                format!("http://localhost:{}", port)
            }
        };
        let worker_url = Url::parse(&worker_url)
            .with_context(|| format!("invalid clustering worker URL: {}", worker_url))?;
        let secs = |key: &str, default: u64| {
            Duration::from_secs(
                lookup(key)
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(default),
            )
        };

        Ok(Self {
            database_url,
            addr,
            worker_url,
            request_timeout: secs("REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            worker_timeout: secs("WORKER_TIMEOUT_SECS", DEFAULT_WORKER_TIMEOUT_SECS),
            pool_max_size: lookup("POOL_MAX_SIZE")
                .and_then(|v| v.parse::<u32>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_POOL_MAX_SIZE),
            pool_timeout: secs("POOL_TIMEOUT_SECS", DEFAULT_POOL_TIMEOUT_SECS),
            max_body_size: lookup("MAX_BODY_SIZE")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(DEFAULT_MAX_BODY_SIZE),
        })
    }
}

fn create_app() -> App<'static, 'static> {
    App::new("globe")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Serves clustered historical events for a globe viewer")
        .arg(
            Arg::with_name("env-file")
                .long("env-file")
                .value_name("PATH")
                .help("Reads environment variables from PATH instead of ./.env"),
        )
}

pub fn init() -> Result<Server> {
    let matches = create_app().get_matches();
    match matches.value_of("env-file") {
        Some(path) => {
            dotenv::from_path(path).with_context(|| format!("cannot read {}", path))?;
        }
        None => {
            dotenv::dotenv().ok();
        }
    }
    let config = Config::from_lookup(|key| std::env::var(key).ok())?;

    Ok(server::run(&config).context("failed to create server")?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn database_url_is_required() {
        let err = config(&[]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn defaults_apply() {
        let c = config(&[("DATABASE_URL", "postgres://localhost/globe")]).unwrap();
        assert_eq!(c.addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(c.worker_url.as_str(), "http://localhost:8000/");
        assert_eq!(c.request_timeout, Duration::from_secs(10));
        assert_eq!(c.worker_timeout, Duration::from_secs(60));
        assert_eq!(c.pool_max_size, 10);
        assert_eq!(c.max_body_size, 1_048_576);
    }

    #[test]
    fn py_port_locates_the_worker_unless_overridden() {
        let c = config(&[("DATABASE_URL", "x"), ("PY_PORT", "9100")]).unwrap();
        assert_eq!(c.worker_url.as_str(), "http://localhost:9100/");
        let c = config(&[
            ("DATABASE_URL", "x"),
            ("PY_PORT", "9100"),
            ("WORKER_URL", "http://cluster-worker:7000"),
        ])
        .unwrap();
        assert_eq!(c.worker_url.as_str(), "http://cluster-worker:7000/");
    }

    #[test]
    fn unparsable_optional_values_fall_back() {
        let c = config(&[
            ("DATABASE_URL", "x"),
            ("REQUEST_TIMEOUT_SECS", "soon"),
            ("POOL_MAX_SIZE", "0"),
        ])
        .unwrap();
        assert_eq!(c.request_timeout, Duration::from_secs(10));
        assert_eq!(c.pool_max_size, 10);
    }

    #[test]
    fn malformed_address_is_fatal() {
        assert!(config(&[("DATABASE_URL", "x"), ("GLOBE_ADDR", "localhost")]).is_err());
        assert!(config(&[("DATABASE_URL", "x"), ("WORKER_URL", "not a url")]).is_err());
    }
}

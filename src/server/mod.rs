use actix_web::{
    dev::Server,
    middleware,
    web::Data,
    App, HttpServer,
};
use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use log::info;
use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::app::Config;
use crate::deadline::Deadline;
use crate::worker::WorkerClient;

mod route;

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not bind server address: {0}")]
    Bind(io::Error),
    #[error("could not connect to database: {0}")]
    DatabaseConnection(r2d2::Error),
    #[error("could not initialize/migrate database: {0}")]
    DatabaseMigration(diesel_migrations::RunMigrationsError),
    #[error("could not create a database connection pool: {0}")]
    PoolInitialization(r2d2::Error),
    #[error("could not set up the clustering worker client: {0}")]
    Worker(crate::error::Error),
}

embed_migrations!();

/// Per-request limits shared by all handlers.
#[derive(Clone, Debug)]
pub struct Settings {
    pub request_timeout: Duration,
    pub max_body_size: usize,
}

impl Settings {
    #[must_use]
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.request_timeout)
    }
}

pub fn run(config: &Config) -> Result<Server, Error> {
    let manager = ConnectionManager::<PgConnection>::new(config.database_url.as_str());
    let pool = Pool::builder()
        .max_size(config.pool_max_size)
        .connection_timeout(config.pool_timeout)
        .build(manager)
        .map_err(Error::PoolInitialization)?;
    let conn = pool.get().map_err(Error::DatabaseConnection)?;
    embedded_migrations::run(&conn).map_err(Error::DatabaseMigration)?;
    drop(conn);

    let worker = Data::new(
        WorkerClient::new(&config.worker_url, config.worker_timeout).map_err(Error::Worker)?,
    );
    info!("clustering worker at {}", worker.process_url());
    let settings = Settings {
        request_timeout: config.request_timeout,
        max_body_size: config.max_body_size,
    };

    let server = HttpServer::new(move || {
        App::new()
            .data(pool.clone())
            .data(settings.clone())
            .app_data(worker.clone())
            .configure(route::init_app)
            .wrap(middleware::Logger::default())
    })
    .bind(config.addr)
    .map_err(Error::Bind)?
    .run();
    info!("listening on {}", config.addr);
    Ok(server)
}

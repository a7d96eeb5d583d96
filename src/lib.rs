#[macro_use]
extern crate diesel;
#[macro_use]
extern crate diesel_migrations;

pub mod app;
mod database;
pub mod deadline;
pub mod error;
pub mod hierarchy;
mod server;
pub mod worker;

pub use database::{ClusterDefinition, PgStore, Pool};

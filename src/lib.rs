// Library exports for gis-cms
// This allows integration tests and the binary to share modules

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod media;
pub mod migrate;
pub mod resources;
pub mod routes;
pub mod state;
pub mod store;

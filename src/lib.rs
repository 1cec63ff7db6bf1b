pub mod cluster;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ids;
pub mod orchestrator;
pub mod routes;
pub mod state;

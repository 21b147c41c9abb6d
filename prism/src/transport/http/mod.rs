//! HTTP transport: axum routes over [`crate::PredictionService`].

mod routes;
mod server;

pub use routes::routes;
pub use server::{ServerConfig, serve};

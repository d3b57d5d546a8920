//! HTTP front end for Dirgate

pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod server;

pub use metrics::MetricsRecorder;
pub use server::{AppState, DirgateServer};

//! Serverless video-generation worker.
//!
//! Wires settings resolution, asset staging, the shared pipeline and result
//! publication into [`handler::JobHandler`], and exposes it over HTTP.

pub mod app;
pub mod config;
pub mod error;
pub mod handler;
pub mod progress;
pub mod response;
pub mod routes;
pub mod staging;
pub mod state;

pub use error::JobError;
pub use handler::JobHandler;
pub use response::{JobResponse, JobStatus, RunRequest};

//! Moluni Remote: the external compute service seen from the orchestrator.
//!
//! `RemoteJobClient` is the seam; `HttpJobClient` speaks the service's
//! JSON-over-HTTP protocol (POST to submit, GET `{url}/{job_id}` for status).

pub mod client;
pub mod http;
pub mod request;

pub use client::{RemoteJobClient, StatusReport};
pub use http::HttpJobClient;
pub use request::CalculationRequest;

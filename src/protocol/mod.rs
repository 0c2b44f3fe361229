//! Wire protocol for the embedding server

pub mod http;

pub use http::{HealthResponse, HttpEmbedRequest, HttpEmbedResponse, HttpErrorResponse};

//! HTTP remote service for the studydeck sync engine.

pub mod client;
pub mod error;
pub mod service;

pub use client::{api_base_url_from_env, RemoteApiClient, API_URL_ENV};
pub use error::{RemoteClientError, Result};
pub use service::{session_remotes, HttpRemoteService};

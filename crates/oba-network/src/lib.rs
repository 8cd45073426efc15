//! `oba-network`: cancelable network operations for the OneBusAway client.
//!
//! Every backend call is an [`Operation`]: a started, cancelable unit of
//! work whose continuations fire exactly once on completion and never after
//! a cancel. Services build URLs, issue requests on a bounded set of request
//! lanes, and normalize the wire formats into the shared domain types.
//!
//! # Architecture
//!
//! ```text
//! RestApiService / ObacoService   ← one method per endpoint
//!     │
//!     ▼
//! ApiClient       ← base URL, default query items, request lanes
//!     │              GET → status check → JSON parse → map
//!     ▼
//! Operation<T>    ← Created → Ready → Executing → Finished | Canceled
//!     │              on_complete / then continuations
//!     ▼
//! AgencyAlert, AgencyWithCoverage
//! ```
//!
//! # Quick start
//!
//! ```rust,ignore
//! use oba_network::{ApiClient, ClientOptions, RestApiService};
//!
//! let client = ApiClient::new("https://api.pugetsound.onebusaway.org", &ClientOptions::default())?;
//! let rest = RestApiService::new(client);
//!
//! let op = rest.agencies_with_coverage();
//! op.then(|agencies| println!("{} agencies", agencies.len()));
//! ```

pub mod client;
pub mod error;
pub mod obaco;
pub mod operation;
pub mod rest;
pub mod types;


pub use client::{ApiClient, ClientOptions};
pub use error::NetworkError;
pub use obaco::ObacoService;
pub use operation::{Operation, OperationState};
pub use rest::RestApiService;
pub use reqwest::Url;
pub use types::{AgencyAlert, AgencyWithCoverage, Severity};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, NetworkError>;

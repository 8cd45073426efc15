pub mod alerts;
pub mod config;
pub mod delegates;
pub mod error;
pub mod io;
pub mod paths;
pub mod preferences;

pub use alerts::{AgencyAlertsStore, CheckOutcome, FetchFailure, FetchKind};
pub use delegates::{AgencyAlertsDelegate, ForegroundLane};
pub use error::{CoreError, Result};

//! Exchange engine and the pieces it is assembled from
//!
//! - `exchange`: per-request lifecycle (persist, gate, dispatch, relay)
//! - `approval`: operator approval tickets
//! - `events`: lifecycle event fan-out
//! - `shutdown`: in-flight tracking and drain
//! - `streaming` / `capture`: relay and audit copies of upstream bodies

pub mod approval;
pub mod capture;
pub mod client;
pub mod error_response;
pub mod events;
pub mod exchange;
pub mod headers;
pub mod middleware;
pub mod service;
pub mod shutdown;
pub mod streaming;
pub mod types;

pub use approval::{ApprovalGate, Decision, Verdict};
pub use events::{EventBroadcaster, GatewayEvent};
pub use exchange::{EngineParts, ExchangeEngine};
pub use service::ProxyService;
pub use shutdown::{DrainResult, ShutdownCoordinator};
pub use types::{ProxyConfig, ProxyError, ProxyResult};

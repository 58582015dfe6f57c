//! Content Service Library
//!
//! Consumes queued content report requests, runs each through the
//! extraction router and records the outcome in the session store and
//! activity history polled by the web tier.

pub mod payload;
pub mod request;
pub mod server;
pub mod session;

pub use payload::{Outcome, RequestPayload, WorkerResponse};
pub use request::{ContentRequest, RequestState, ServiceError};
pub use server::{ServerConfig, WorkerServer};
pub use session::{ActivityHistory, FileSessionStore, ServiceHistory, SessionError, SessionStore};

//! HTTP API handlers for quorum-pub
//!
//! REST endpoints to start and inspect publication runs, plus an SSE
//! stream of run events.

pub mod health;
pub mod publications;
pub mod sse;

pub use health::health_routes;
pub use publications::publication_routes;
pub use sse::event_stream;

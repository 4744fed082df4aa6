//! Signaling and HTTP surface of the Classcast backend.
//!
//! One WebSocket connection per client drives the signaling protocol in
//! [`protocol`]; each connection's state machine lives in [`session`].
//! Same-instance broadcasts go through the [`hub`]; the thin REST
//! endpoints under [`http`] share the distributed room record with the
//! signaling core.

pub mod http;
pub mod hub;
pub mod protocol;
pub mod session;
pub mod state;
pub mod websocket;

pub use state::AppState;

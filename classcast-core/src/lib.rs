//! Core types and services for the Classcast live-classroom backend.
//!
//! This crate carries everything the other crates share: configuration,
//! the error taxonomy, logging bootstrap, domain models (rooms, members,
//! chat), and the distributed room store abstraction with its Redis and
//! in-memory implementations.

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};

//! # Scrobd Common Library
//!
//! Shared types for the scrobd daemon: the play data model, the event
//! system, temporal-closeness classification, and common error types.
//!
//! Everything here is consumed by the `scrobd` daemon crate and by adapter
//! implementations that plug sources and clients into it.

pub mod error;
pub mod events;
pub mod play;
pub mod time;

pub use error::{Error, Result};

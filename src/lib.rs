//! Client-side state engine for conversing with the dish assistant backend.
//!
//! The interesting parts live in [`chat`]: the message log and its
//! reconciliation with server snapshots, the single-flight send pipeline, the
//! progressive reveal of structured replies and the debounced draft store.

pub mod api;
pub mod app;
pub mod chat;
pub mod error;
pub mod storage;
pub mod ui;
pub mod utils;

pub use error::{ApiError, ChatError, ChatResult};

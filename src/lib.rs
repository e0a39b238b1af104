//! Transcode service core.
//!
//! Chunked-upload reassembly, a bounded-worker transcode scheduler, and the
//! external media-processing subprocess adapter that drives it, exposed over
//! gRPC.

pub mod config;
pub mod error;
pub mod grpc;
pub mod manager;
pub mod media;
pub mod models;
pub mod registry;
pub mod storage;
pub mod upload;

pub use config::Config;
pub use error::{AppError, Result};

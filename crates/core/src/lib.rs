//! Core library: file catalogue refresh, classification, batch moves and
//! background jobs.

pub mod categorize;
pub mod classifier;
pub mod config;
pub mod error;
pub mod fs_move;
pub mod jobs;
pub mod model;
pub mod models;
pub mod mover;
pub mod pipeline;
pub mod progress;
pub mod scanner;
pub mod training_log;

pub use error::{PipelineError, Result};

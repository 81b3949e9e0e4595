//! Sensorline Ingest - the edge side of the pipeline
//!
//! This crate provides:
//! - The record line parser and line batching
//! - The directory watcher with archiving of delivered files
//! - The gRPC relay delivering batches to the collector

pub mod archive;
pub mod batcher;
pub mod error;
pub mod parser;
pub mod relay;
pub mod watcher;

pub use archive::Archiver;
pub use batcher::{LineBatcher, LineGroup};
pub use error::{IngestError, RelayError};
pub use parser::{RecordLine, parse_line};
pub use relay::{CollectorRelay, Relay};
pub use watcher::{FileOutcome, IngestWatcher, WatcherState, wait_until_readable};

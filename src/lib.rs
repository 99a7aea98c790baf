//! # Rust Event Builder
//!
//! Core library for the `rust-evb` event builder. Front-end readout boards
//! each send one fragment per trigger; the builder merges the fragments that
//! share an upstream event id into a single event and forwards it on an
//! output channel chosen by the event's class.
//!
//! ## Crate Structure
//!
//! - **`assembler`**: Routing, merging, readiness and timeout eviction. The
//!   `EventAssembler` owns every pending event.
//! - **`clock`**: The `Clock` trait, so event aging can be driven by tests.
//! - **`config`**: Figment-based configuration (`EvbConfig`) loaded from TOML
//!   with `RUST_EVB_` environment overrides.
//! - **`dispatcher`**: The async dispatch loop and its run control.
//! - **`emulator`**: A front-end emulator producing fragment buffers.
//! - **`error`**: The `EvbError` enum and `AppResult` alias.
//! - **`health`**: Health escalation driven by timeouts.
//! - **`metrics`**: Counters, snapshots and the periodic reporter.
//! - **`serializer`**: Event wire encoding and emission.
//! - **`tracing_init`**: Logging setup.
//! - **`transport`**: Input and output channel traits with in-memory and UDP
//!   implementations.
//!
//! Wire-format types live in the `evb-format` crate and are re-exported as
//! [`format`].

pub mod assembler;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod emulator;
pub mod error;
pub mod health;
pub mod metrics;
pub mod serializer;
pub mod tracing_init;
pub mod transport;

pub use evb_format as format;

pub use assembler::{Event, EventAssembler, MergeOutcome, MergeResult};
pub use config::EvbConfig;
pub use dispatcher::{CycleReport, Dispatcher, RunControl, RunState};
pub use error::{AppResult, EvbError};

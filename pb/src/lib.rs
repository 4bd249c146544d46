//! PurposeBench - purpose-aware publish/subscribe benchmark
//!
//! PurposeBench carries a message *purpose* over plain topic-based pub/sub
//! using one of four wire methods, checks that brokers deliver only messages
//! whose purpose a subscriber approved, and keeps distributed benchmark nodes
//! in lockstep with a ready/done barrier.
//!
//! # Core Concepts
//!
//! - **Purpose methods**: topic encoding, per-message property, registration
//!   by message, registration by topic
//! - **Purpose filters**: brace-grouped alternatives expanded per topic level
//! - **Barrier**: retained READY/DONE declarations on reserved topics
//! - **Correctness**: GOOD/BAD payloads counted per client
//!
//! # Modules
//!
//! - [`purpose`] - Purpose methods, wire codec and filter expansion
//! - [`transport`] - Transport trait and the in-memory broker
//! - [`sync`] - Ready/done barrier across nodes
//! - [`client`] - Benchmark client and correctness scenario
//! - [`results`] - Correctness results and the result log writer
//! - [`simulation`] - Randomized client workload
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod client;
pub mod config;
pub mod purpose;
pub mod results;
pub mod simulation;
pub mod sync;
pub mod transport;

// Re-export commonly used types
pub use client::{BenchmarkClient, CorrectnessScenario};
pub use config::Config;
pub use purpose::{CodecError, PurposeCodec, PurposeError, PurposeMethod, WireAction, expand_filter};
pub use results::{CorrectnessTestResult, ResultLogger, ResultSink};
pub use simulation::{SimulationSummary, TestFramework};
pub use sync::{SyncBarrier, SyncError};
pub use transport::{InboundMessage, MemoryBroker, MemoryClient, Properties, Transport, TransportError};

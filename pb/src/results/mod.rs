//! Benchmark results: correctness aggregates and the result log writer

mod correctness;
mod logger;

pub use correctness::CorrectnessTestResult;
pub use logger::{LogRecord, ResultLogger, ResultSink};

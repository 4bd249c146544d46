//! Benchmark clients and the correctness scenario that drives them

mod benchmark;
mod scenario;

pub use benchmark::{BAD_PAYLOAD, BenchmarkClient, GOOD_PAYLOAD};
pub use scenario::CorrectnessScenario;

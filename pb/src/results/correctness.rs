//! Correctness test bookkeeping

use std::fmt;

use serde::Serialize;

/// Aggregate outcome of one correctness test for one client
///
/// Created when the test starts and never reset; a new test gets a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorrectnessTestResult {
    client_id: String,
    test_name: String,
    success_count: u64,
    failure_count: u64,
    total_count: u64,
    failure_reasons: Vec<String>,
}

impl CorrectnessTestResult {
    pub fn new(client_id: impl Into<String>, test_name: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            test_name: test_name.into(),
            success_count: 0,
            failure_count: 0,
            total_count: 0,
            failure_reasons: Vec::new(),
        }
    }

    pub fn success(&mut self) {
        self.success_count += 1;
        self.total_count += 1;
    }

    pub fn failure(&mut self, reason: impl Into<String>) {
        self.failure_count += 1;
        self.total_count += 1;
        self.failure_reasons.push(reason.into());
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn success_count(&self) -> u64 {
        self.success_count
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn failure_reasons(&self) -> &[String] {
        &self.failure_reasons
    }

    pub fn passed(&self) -> bool {
        self.failure_count == 0
    }
}

impl fmt::Display for CorrectnessTestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Results for Client: {} - Test: {}", self.client_id, self.test_name)?;
        writeln!(
            f,
            "> Successes: {} - Failures: {} - Total: {}",
            self.success_count, self.failure_count, self.total_count
        )?;
        for reason in &self.failure_reasons {
            writeln!(f, "{}", reason)?;
        }
        Ok(())
    }
}

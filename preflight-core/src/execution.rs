//! The outcome of running a plugin to completion (or failure) inside the
//! sandbox.

use std::time::Duration;

/// Measured resource consumption for one execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceUsage {
    pub peak_memory_bytes: u64,
    pub cpu_time: Duration,
    pub fuel_consumed: u64,
}

/// The result of one plugin execution.
///
/// `error` carries a human-readable description rather than a typed error
/// from this crate: by the time an `ExecutionResult` exists, the error (if
/// any) may have originated in `preflight-sandbox`, a sibling crate this one
/// does not depend on, so the boundary is necessarily a string.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration: Duration,
    pub resource_usage: ResourceUsage,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn success(
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        duration: Duration,
        resource_usage: ResourceUsage,
    ) -> Self {
        Self {
            success: true,
            stdout,
            stderr,
            duration,
            resource_usage,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            stdout: Vec::new(),
            stderr: Vec::new(),
            duration,
            resource_usage: ResourceUsage::default(),
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_result_carries_no_error() {
        let result = ExecutionResult::success(
            b"out".to_vec(),
            Vec::new(),
            Duration::from_millis(10),
            ResourceUsage::default(),
        );
        assert!(result.success);
        assert!(result.error.is_none());
    }

    #[test]
    fn failure_result_carries_empty_buffers() {
        let result = ExecutionResult::failure("timed out", Duration::from_secs(5));
        assert!(!result.success);
        assert!(result.stdout.is_empty());
        assert_eq!(result.error.as_deref(), Some("timed out"));
    }
}

//! Pluggable heartbeat check registry (spec 4.4).
//!
//! A check is a named, timeout-bounded async operation. Bots register
//! checks by name; the heartbeat loop resolves and executes them each
//! tick via [`CheckRegistry::execute_check`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::{timeout, Duration};

use crate::types::{CheckResult, CheckStatus};

/// A single heartbeat check.
#[async_trait]
pub trait Check: Send + Sync {
    /// Run the check, returning `Ok(message)` on success.
    async fn run(&self) -> Result<String, String>;
}

/// A boxed, dynamically-dispatched check.
pub type BoxedCheck = Arc<dyn Check>;

/// Registry mapping check names to their implementations.
#[derive(Clone, Default)]
pub struct CheckRegistry {
    checks: HashMap<String, BoxedCheck>,
}

impl CheckRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a check under `name`, replacing any existing registration.
    pub fn register(&mut self, name: impl Into<String>, check: BoxedCheck) {
        self.checks.insert(name.into(), check);
    }

    /// Execute a named check, bounding it to `max_duration_s`.
    ///
    /// An unknown check name yields a `failed` result rather than a panic,
    /// since a stale `CheckDefinition` should degrade the tick, not crash it.
    pub async fn execute_check(&self, name: &str, max_duration_s: u64) -> CheckResult {
        let started_at = chrono::Utc::now();

        let Some(check) = self.checks.get(name) else {
            return CheckResult {
                check_name: name.to_owned(),
                status: CheckStatus::Failed,
                started_at,
                ended_at: Some(chrono::Utc::now()),
                success: false,
                error: Some(format!("no check registered under name {name}")),
                error_type: Some("unknown_check".to_owned()),
                message: None,
            };
        };

        let outcome = timeout(Duration::from_secs(max_duration_s), check.run()).await;
        let ended_at = Some(chrono::Utc::now());

        match outcome {
            Ok(Ok(message)) => CheckResult {
                check_name: name.to_owned(),
                status: CheckStatus::Success,
                started_at,
                ended_at,
                success: true,
                error: None,
                error_type: None,
                message: Some(message),
            },
            Ok(Err(error)) => CheckResult {
                check_name: name.to_owned(),
                status: CheckStatus::Failed,
                started_at,
                ended_at,
                success: false,
                error: Some(error),
                error_type: Some("check_error".to_owned()),
                message: None,
            },
            Err(_) => CheckResult {
                check_name: name.to_owned(),
                status: CheckStatus::Timeout,
                started_at,
                ended_at,
                success: false,
                error: Some(format!("check {name} exceeded {max_duration_s}s")),
                error_type: Some("timeout".to_owned()),
                message: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysOk;
    #[async_trait]
    impl Check for AlwaysOk {
        async fn run(&self) -> Result<String, String> {
            Ok("ok".to_owned())
        }
    }

    struct AlwaysSlow;
    #[async_trait]
    impl Check for AlwaysSlow {
        async fn run(&self) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok("too slow".to_owned())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_check_fails_without_panicking() {
        let registry = CheckRegistry::new();
        let result = registry.execute_check("ghost", 1).await;
        assert_eq!(result.status, CheckStatus::Failed);
        assert!(!result.success);
    }

    #[tokio::test]
    async fn registered_check_succeeds() {
        let mut registry = CheckRegistry::new();
        registry.register("ping", Arc::new(AlwaysOk));
        let result = registry.execute_check("ping", 1).await;
        assert_eq!(result.status, CheckStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_check_times_out() {
        let mut registry = CheckRegistry::new();
        registry.register("slow", Arc::new(AlwaysSlow));
        let handle = tokio::spawn(async move { registry.execute_check("slow", 1).await });
        tokio::time::advance(Duration::from_secs(2)).await;
        let result = handle.await.unwrap();
        assert_eq!(result.status, CheckStatus::Timeout);
    }
}

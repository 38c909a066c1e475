//! Explicit wrapper for best-effort side effects.
//!
//! Work that must never fail the surrounding operation (usage rollups, audit
//! writes after an irreversible external call) runs through `NonCritical`.
//! Failures are logged at `warn!` and swallowed; the caller still sees whether
//! the step completed.

use std::future::Future;

use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NonCriticalOutcome<T> {
    Completed(T),
    Swallowed,
}

impl<T> NonCriticalOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, NonCriticalOutcome::Completed(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            NonCriticalOutcome::Completed(value) => Some(value),
            NonCriticalOutcome::Swallowed => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NonCritical {
    operation: &'static str,
}

impl NonCritical {
    pub fn new(operation: &'static str) -> Self {
        Self { operation }
    }

    pub async fn run<T, Fut>(self, work: Fut) -> NonCriticalOutcome<T>
    where
        Fut: Future<Output = anyhow::Result<T>>,
    {
        match work.await {
            Ok(value) => NonCriticalOutcome::Completed(value),
            Err(e) => {
                warn!(operation = self.operation, error = %e, "Non-critical step failed, continuing");
                NonCriticalOutcome::Swallowed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completed_work_passes_value_through() {
        let outcome = NonCritical::new("rollup").run(async { Ok(7) }).await;
        assert_eq!(outcome, NonCriticalOutcome::Completed(7));
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let outcome: NonCriticalOutcome<()> = NonCritical::new("rollup")
            .run(async { Err(anyhow::anyhow!("db down")) })
            .await;
        assert!(!outcome.is_completed());
        assert_eq!(outcome.into_option(), None);
    }
}

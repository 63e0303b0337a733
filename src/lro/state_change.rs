//! Wait for an object to reach a state
//!
//! Some transitions are not tracked by an operation at all, e.g. a deleted
//! subnet that keeps answering GET for a while. [`StateChangeConf`] polls a
//! refresh function until it reports one of the target states a number of
//! times in a row.

use crate::error::{ArmError, Result};
use crate::timeouts::OperationContext;
use std::future::Future;
use std::time::Duration;

/// Missing-object observations tolerated while waiting for a non-empty target
const DEFAULT_NOT_FOUND_CHECKS: u32 = 20;

#[derive(Debug, Clone)]
pub struct StateChangeConf {
    pub pending: Vec<String>,
    pub target: Vec<String>,
    pub poll_interval: Duration,
    /// Consecutive target observations required before returning
    pub continuous_target_occurrence: u32,
    pub not_found_checks: u32,
}

impl StateChangeConf {
    pub fn new(pending: &[&str], target: &[&str]) -> Self {
        Self {
            pending: pending.iter().map(|s| s.to_string()).collect(),
            target: target.iter().map(|s| s.to_string()).collect(),
            poll_interval: Duration::from_secs(10),
            continuous_target_occurrence: 1,
            not_found_checks: DEFAULT_NOT_FOUND_CHECKS,
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn continuous_target_occurrence(mut self, count: u32) -> Self {
        self.continuous_target_occurrence = count.max(1);
        self
    }

    /// Poll `refresh` until a target state is seen often enough in a row.
    ///
    /// `refresh` returns the current object (if any) and its state name. An
    /// absent object with an empty target list means "wait until gone".
    pub async fn wait_for_state<T, F, Fut>(&self, ctx: &OperationContext, mut refresh: F) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(Option<T>, String)>>,
    {
        let mut target_seen: u32 = 0;
        let mut not_found: u32 = 0;
        let mut polls: u32 = 0;

        loop {
            let (value, state) = ctx.run(refresh()).await?;
            polls += 1;
            tracing::debug!("State poll #{} for {}: {:?}", polls, ctx.waiting_for(), state);

            if self.target.iter().any(|t| t == &state) || (value.is_none() && self.target.is_empty()) {
                target_seen += 1;
                if target_seen >= self.continuous_target_occurrence {
                    return Ok(value);
                }
            } else if self.pending.iter().any(|p| p == &state) {
                target_seen = 0;
            } else if value.is_none() {
                target_seen = 0;
                not_found += 1;
                if not_found > self.not_found_checks {
                    return Err(ArmError::NotFound(format!(
                        "{} (no object after {} checks)",
                        ctx.waiting_for(),
                        not_found
                    )));
                }
            } else {
                return Err(ArmError::OperationFailed {
                    status: state.clone(),
                    code: "UnexpectedState".to_string(),
                    message: format!(
                        "unexpected state {:?} while {}, wanted one of {:?}",
                        state,
                        ctx.waiting_for(),
                        self.target
                    ),
                });
            }

            ctx.sleep(self.poll_interval).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeouts::OperationKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_util::sync::CancellationToken;

    fn ctx(timeout: Duration) -> OperationContext {
        OperationContext::new(OperationKind::Delete, "Subnet \"s\"", timeout, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_requires_consecutive_target_observations() {
        // Gone, back, then gone for good
        let states = ["Exists", "NotFound", "Exists", "NotFound", "NotFound"];
        let calls = AtomicU32::new(0);

        let conf = StateChangeConf::new(&["Exists"], &["NotFound"])
            .poll_interval(Duration::from_millis(1))
            .continuous_target_occurrence(2);

        let result: Option<()> = conf
            .wait_for_state(&ctx(Duration::from_secs(5)), || {
                let n = calls.fetch_add(1, Ordering::SeqCst) as usize;
                let state = states[n.min(states.len() - 1)].to_string();
                async move { Ok((None, state)) }
            })
            .await
            .unwrap();

        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_times_out_while_pending() {
        let conf = StateChangeConf::new(&["Exists"], &["NotFound"]).poll_interval(Duration::from_millis(5));

        let err = conf
            .wait_for_state(&ctx(Duration::from_millis(40)), || async {
                Ok((Some(()), "Exists".to_string()))
            })
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(err.to_string().contains("deleting Subnet \"s\""));
    }

    #[tokio::test]
    async fn test_unexpected_state_fails() {
        let conf = StateChangeConf::new(&["Updating"], &["Succeeded"]).poll_interval(Duration::from_millis(1));

        let err = conf
            .wait_for_state(&ctx(Duration::from_secs(1)), || async {
                Ok((Some(1), "Failed".to_string()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ArmError::OperationFailed { .. }));
    }

    #[tokio::test]
    async fn test_refresh_errors_propagate() {
        let conf = StateChangeConf::new(&["Exists"], &["NotFound"]);

        let err = conf
            .wait_for_state::<(), _, _>(&ctx(Duration::from_secs(1)), || async {
                Err(ArmError::Transport("connection reset".to_string()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ArmError::Transport(_)));
    }
}

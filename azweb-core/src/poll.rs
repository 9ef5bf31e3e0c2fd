//! Provisioning-state poll loop
//!
//! Turns an asynchronous remote state transition into a single awaited call.
//! A refresh closure reports the current status of some remote object; the
//! loop keeps calling it while the status is pending and stops on a target
//! status, a failure status, a refresh error, an unexpected status, or the
//! deadline.
//!
//! The interval is fixed. Refreshes start no sooner than
//! `min_poll_interval` after the previous one started, and the first
//! refresh happens immediately.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use log::debug;
use tokio::time::Instant;

use crate::provider::{ErrorKind, ProviderError, ProviderResult};
use crate::timeouts::Deadline;

/// Default pause between refreshes
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Result of one status query
#[derive(Debug, Clone, PartialEq)]
pub struct PollState<T> {
    pub value: T,
    pub status: String,
}

impl<T> PollState<T> {
    pub fn new(value: T, status: impl Into<String>) -> Self {
        Self {
            value,
            status: status.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusClass {
    Pending,
    Target,
    Failure,
    Unexpected,
}

/// Parameters of one wait
#[derive(Debug, Clone)]
pub struct StateChangeConf {
    pub pending: HashSet<String>,
    pub target: HashSet<String>,
    pub failure: HashSet<String>,
    pub min_poll_interval: Duration,
    pub deadline: Deadline,
    /// What is being waited on, used in errors and logs
    pub subject: String,
}

impl StateChangeConf {
    pub fn new(pending: &[&str], target: &[&str], deadline: Deadline) -> Self {
        Self {
            pending: pending.iter().map(|s| s.to_string()).collect(),
            target: target.iter().map(|s| s.to_string()).collect(),
            failure: HashSet::new(),
            min_poll_interval: DEFAULT_POLL_INTERVAL,
            deadline,
            subject: "resource".to_string(),
        }
    }

    pub fn with_failure(mut self, failure: &[&str]) -> Self {
        self.failure = failure.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_min_poll_interval(mut self, interval: Duration) -> Self {
        self.min_poll_interval = interval;
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    fn check_disjoint(&self) -> ProviderResult<()> {
        let overlap: Vec<&String> = self
            .pending
            .intersection(&self.target)
            .chain(self.pending.intersection(&self.failure))
            .chain(self.target.intersection(&self.failure))
            .collect();
        if overlap.is_empty() && !self.target.is_empty() {
            Ok(())
        } else if self.target.is_empty() {
            Err(ProviderError::validation(format!(
                "no target states configured while waiting for {}",
                self.subject
            )))
        } else {
            Err(ProviderError::validation(format!(
                "states {:?} are listed in more than one set while waiting for {}",
                overlap, self.subject
            )))
        }
    }

    fn classify(&self, status: &str) -> StatusClass {
        if self.target.contains(status) {
            StatusClass::Target
        } else if self.pending.contains(status) {
            StatusClass::Pending
        } else if self.failure.contains(status) {
            StatusClass::Failure
        } else {
            StatusClass::Unexpected
        }
    }

    fn timeout_error(&self, last_state: Option<String>) -> ProviderError {
        let message = match &last_state {
            Some(state) => format!(
                "timeout while waiting for {} to become {} (last state: {})",
                self.subject,
                sorted(&self.target).join(", "),
                state
            ),
            None => format!(
                "timeout while waiting for {} to become {}",
                self.subject,
                sorted(&self.target).join(", ")
            ),
        };
        ProviderError::with_kind(ErrorKind::Timeout { last_state }, message)
    }

    /// Poll `refresh` until a terminal outcome
    ///
    /// Returns the value of the first refresh whose status is in `target`.
    pub async fn wait_for_state<T, F, Fut>(&self, mut refresh: F) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<PollState<T>>>,
    {
        self.check_disjoint()?;

        let deadline = self.deadline.instant();
        let mut last_state: Option<String> = None;
        let mut attempts = 0u32;

        loop {
            if Instant::now() >= deadline {
                return Err(self.timeout_error(last_state));
            }

            let started = Instant::now();
            attempts += 1;
            let polled = match tokio::time::timeout_at(deadline, refresh()).await {
                Ok(result) => result?,
                Err(_) => return Err(self.timeout_error(last_state)),
            };
            debug!(
                "Refresh {} of {}: state {}",
                attempts, self.subject, polled.status
            );

            match self.classify(&polled.status) {
                StatusClass::Target => return Ok(polled.value),
                StatusClass::Pending => {}
                StatusClass::Failure => {
                    return Err(ProviderError::with_kind(
                        ErrorKind::Failed {
                            state: polled.status.clone(),
                        },
                        format!("{} reached failure state {}", self.subject, polled.status),
                    ));
                }
                StatusClass::Unexpected => {
                    let mut expected = sorted(&self.pending);
                    expected.extend(sorted(&self.target));
                    return Err(ProviderError::with_kind(
                        ErrorKind::UnexpectedState {
                            state: polled.status.clone(),
                            expected: expected.clone(),
                        },
                        format!(
                            "unexpected state '{}' for {}, wanted one of: {}",
                            polled.status,
                            self.subject,
                            expected.join(", ")
                        ),
                    ));
                }
            }

            last_state = Some(polled.status);
            let next = (started + self.min_poll_interval).min(deadline);
            tokio::time::sleep_until(next).await;
        }
    }
}

fn sorted(set: &HashSet<String>) -> Vec<String> {
    let mut items: Vec<String> = set.iter().cloned().collect();
    items.sort();
    items
}

/// Retry `op` while it reports not-found, bounded by `deadline`
///
/// Covers objects that ARM has accepted but not yet made readable, such as
/// host keys of a freshly created function app. Any other error is returned
/// at once.
pub async fn retry_not_found<T, F, Fut>(
    deadline: Deadline,
    interval: Duration,
    mut op: F,
) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let mut last_error: Option<ProviderError> = None;

    loop {
        if deadline.is_expired() {
            let mut err = ProviderError::with_kind(
                ErrorKind::Timeout {
                    last_state: Some("NotFound".to_string()),
                },
                "timeout while retrying a not-found response",
            );
            if let Some(cause) = last_error {
                err = err.with_cause(cause);
            }
            return Err(err);
        }

        let started = Instant::now();
        match tokio::time::timeout_at(deadline.instant(), op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if e.is_not_found() => {
                debug!("Not found yet, retrying: {}", e);
                last_error = Some(e);
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(ProviderError::with_kind(
                    ErrorKind::Timeout { last_state: None },
                    "timeout while retrying a not-found response",
                ));
            }
        }

        let next = (started + interval).min(deadline.instant());
        tokio::time::sleep_until(next).await;
    }
}

use std::thread;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::api::RecordFetcher;
use crate::domain::{Identity, Record};

/// Fixed-delay retry budget; the delay does not grow between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls allowed, including the first.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

/// Fetches one record, retrying transient failures. Exhausted or terminal
/// failures yield `None` so the caller's batch keeps going.
pub fn fetch_with_retry<F>(fetcher: &F, id: &Identity, policy: &RetryPolicy) -> Option<Record>
where
    F: RecordFetcher + ?Sized,
{
    let max_attempts = policy.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        debug!(id = %id, attempt, max_attempts, "fetching item");
        match fetcher.fetch(id) {
            Ok(record) => return Some(record),
            Err(err) if err.is_transient() => {
                warn!(id = %id, attempt, max_attempts, %err, "transient fetch failure");
                if attempt < max_attempts && !policy.delay.is_zero() {
                    thread::sleep(policy.delay);
                }
            }
            Err(err) => {
                warn!(id = %id, attempt, %err, "fetch failed, not retrying");
                return None;
            }
        }
    }
    error!(id = %id, max_attempts, "giving up after exhausting retries");
    None
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;

    use super::*;
    use crate::error::ScanError;

    struct Scripted {
        calls: Mutex<u32>,
        fail_first: u32,
    }

    impl RecordFetcher for Scripted {
        fn fetch(&self, id: &Identity) -> Result<Record, ScanError> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls <= self.fail_first {
                return Err(ScanError::ApiStatus {
                    status: 502,
                    message: "bad gateway".to_string(),
                });
            }
            Ok(Record::new(id.clone(), Utc::now()))
        }
    }

    #[test]
    fn recovers_after_transient_failures() {
        let fetcher = Scripted {
            calls: Mutex::new(0),
            fail_first: 2,
        };
        let id: Identity = "5c0e531286f7747fa54205c2".parse().unwrap();
        let policy = RetryPolicy::new(5, Duration::ZERO);

        let record = fetch_with_retry(&fetcher, &id, &policy);
        assert!(record.is_some());
        assert_eq!(*fetcher.calls.lock().unwrap(), 3);
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_attempts, 1);
    }
}

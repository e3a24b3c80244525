use std::sync::Mutex;
use std::time::Duration;

use spt_item_scanner::api::RecordFetcher;
use spt_item_scanner::domain::{Identity, Record};
use spt_item_scanner::error::ScanError;
use spt_item_scanner::retry::{RetryPolicy, fetch_with_retry};

struct FailingFetcher {
    calls: Mutex<u32>,
    error: fn() -> ScanError,
}

impl FailingFetcher {
    fn new(error: fn() -> ScanError) -> Self {
        Self {
            calls: Mutex::new(0),
            error,
        }
    }

    fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

impl RecordFetcher for FailingFetcher {
    fn fetch(&self, _id: &Identity) -> Result<Record, ScanError> {
        *self.calls.lock().unwrap() += 1;
        Err((self.error)())
    }
}

fn id() -> Identity {
    "590c657e86f77412b013051d".parse().unwrap()
}

#[test]
fn transient_failures_use_the_whole_budget() {
    let fetcher = FailingFetcher::new(|| ScanError::ApiHttp("connection refused".to_string()));
    let policy = RetryPolicy::new(10, Duration::ZERO);

    let record = fetch_with_retry(&fetcher, &id(), &policy);

    assert!(record.is_none());
    assert_eq!(fetcher.calls(), 10);
}

#[test]
fn non_success_status_is_retried() {
    let fetcher = FailingFetcher::new(|| ScanError::ApiStatus {
        status: 429,
        message: "slow down".to_string(),
    });
    let policy = RetryPolicy::new(4, Duration::from_millis(1));

    assert!(fetch_with_retry(&fetcher, &id(), &policy).is_none());
    assert_eq!(fetcher.calls(), 4);
}

#[test]
fn terminal_failure_is_not_retried() {
    let fetcher = FailingFetcher::new(|| ScanError::IncompleteRecord("590c657e".to_string()));
    let policy = RetryPolicy::new(10, Duration::from_secs(60));

    assert!(fetch_with_retry(&fetcher, &id(), &policy).is_none());
    assert_eq!(fetcher.calls(), 1);
}

#[test]
fn undecodable_body_is_not_retried() {
    let fetcher = FailingFetcher::new(|| ScanError::ApiDecode("expected value".to_string()));
    let policy = RetryPolicy::default();

    assert!(fetch_with_retry(&fetcher, &id(), &policy).is_none());
    assert_eq!(fetcher.calls(), 1);
}

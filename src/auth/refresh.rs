//! Single-flight refresh and its retry/backoff policy.
//!
//! Modeled as an optional in-flight [`Shared`] future: concurrent callers
//! attach to whichever refresh is already running instead of each firing
//! their own request.

use std::sync::Mutex;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

use crate::error::{Error, Result};

use super::session::Session;

const BACKOFF_BASE_MS: u64 = 200;
const BACKOFF_MAX_TRIES: u32 = 10;
const BACKOFF_MAX_TOTAL_MS: u64 = 30_000;

type RefreshFuture = Shared<BoxFuture<'static, Result<Session>>>;

/// Coalesces concurrent `refresh_session` callers into one outbound call.
#[derive(Default)]
pub struct RefreshCoordinator {
	in_flight: Mutex<Option<RefreshFuture>>,
}

impl RefreshCoordinator {
	pub fn new() -> Self {
		Self::default()
	}

	/// Runs `perform` as the single in-flight refresh, or attaches to one
	/// already running. Clears the in-flight slot once it resolves,
	/// success or failure.
	pub async fn refresh<F>(&self, perform: F) -> Result<Session>
	where
		F: FnOnce() -> BoxFuture<'static, Result<Session>>,
	{
		let existing = self.in_flight.lock().unwrap().clone();
		let future = match existing {
			Some(future) => future,
			None => {
				let shared: RefreshFuture = perform().boxed().shared();
				*self.in_flight.lock().unwrap() = Some(shared.clone());
				shared
			}
		};
		let result = future.await;
		*self.in_flight.lock().unwrap() = None;
		result
	}
}

/// Retries `attempt` with exponential backoff on retryable errors: base
/// 200 ms, factor 2, capped at 10 tries or 30 s aggregate wait.
pub async fn with_retry<F, Fut>(mut attempt: F) -> Result<Session>
where
	F: FnMut() -> Fut,
	Fut: std::future::Future<Output = Result<Session>>,
{
	let mut waited_ms: u64 = 0;
	for try_index in 0..BACKOFF_MAX_TRIES {
		match attempt().await {
			Ok(session) => return Ok(session),
			Err(error) if error.is_retryable() => {
				let delay = BACKOFF_BASE_MS * 2u64.pow(try_index);
				if waited_ms + delay > BACKOFF_MAX_TOTAL_MS {
					return Err(error);
				}
				waited_ms += delay;
				tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
			}
			Err(error) => return Err(error),
		}
	}
	Err(Error::new(crate::error::ErrorKind::RetryableFetch { status: 0 }, "refresh retries exhausted"))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;

	fn dummy_session() -> Session {
		Session::new("a".to_string(), "r".to_string(), 3600, None, serde_json::Value::Null, 0)
	}

	#[tokio::test]
	async fn concurrent_refreshes_share_one_result() {
		let coordinator = Arc::new(RefreshCoordinator::new());
		let calls = Arc::new(AtomicUsize::new(0));

		let mut handles = Vec::new();
		for _ in 0..5 {
			let coordinator = coordinator.clone();
			let calls = calls.clone();
			handles.push(tokio::spawn(async move {
				coordinator
					.refresh(move || {
						calls.fetch_add(1, Ordering::SeqCst);
						Box::pin(async {
							tokio::time::sleep(std::time::Duration::from_millis(20)).await;
							Ok(dummy_session())
						})
					})
					.await
			}));
		}
		for handle in handles {
			assert!(handle.await.unwrap().is_ok());
		}
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn retry_stops_on_non_retryable_error() {
		let attempts = Arc::new(AtomicUsize::new(0));
		let attempts_clone = attempts.clone();
		let result = with_retry(move || {
			attempts_clone.fetch_add(1, Ordering::SeqCst);
			async { Err(Error::new(crate::error::ErrorKind::InvalidCredentials, "nope")) }
		})
		.await;
		assert!(result.is_err());
		assert_eq!(attempts.load(Ordering::SeqCst), 1);
	}
}

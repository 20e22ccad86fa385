//! Named, timed, re-entrant-safe mutual exclusion around session state.
//!
//! The registry hands out one `tokio::sync::Mutex<()>` per name
//! (`HashMap<String, Arc<Mutex<()>>>`). Re-entrancy is tracked with a
//! `tokio::task_local!` set of held names: a task that already holds `name`
//! does not block on itself, it runs its nested critical section inline.
//!
//! The reference describes re-entry as enqueuing the nested section into a
//! `pending-in-lock` list drained after the outer section exits. That model
//! assumes a host where a reentrant call can be scheduled without the outer
//! call waiting on it. Under async/await, callers here always `.await` the
//! nested `with_lock` call from inside the outer closure, so "drained after
//! the outer section exits" would mean the outer's own future can never
//! resolve until the nested one does — the two are the same poll chain on
//! the same task, so nothing would ever drain the queue. The spec's own
//! design notes call this out directly: "where the host has native
//! re-entrant mutexes, this reduces to a counter." That's what this does —
//! `HELD` tracks presence (equivalent to a depth count, since the outermost
//! acquisition is the only one that inserts/removes) and nested calls run
//! immediately, in the order the task makes them, which is already FIFO
//! because a single task only ever does one thing at a time.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;

use crate::error::{Error, Result};

tokio::task_local! {
    static HELD: std::cell::RefCell<std::collections::HashSet<String>>;
}

/// Registry of named locks, keyed by lock name (e.g. `"session"`).
#[derive(Debug, Default)]
pub struct LockRegistry {
	mutexes: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LockRegistry {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	fn mutex_for(&self, name: &str) -> Arc<AsyncMutex<()>> {
		let mut mutexes = self.mutexes.lock().unwrap();
		mutexes.entry(name.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}

	/// Runs `f` while holding the named lock.
	///
	/// `timeout_ms < 0` waits indefinitely, `0` fails fast if the lock is
	/// held, and `> 0` waits at most that long. A task that already holds
	/// `name` (detected via task-local re-entrancy tracking) runs `f`
	/// directly without attempting to re-acquire, rather than deadlocking
	/// on itself.
	pub async fn with_lock<F, Fut, T>(&self, name: &str, timeout_ms: i64, f: F) -> Result<T>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = T>,
	{
		if already_held(name) {
			return Ok(f().await);
		}

		let mutex = self.mutex_for(name);
		let guard = match timeout_ms {
			t if t < 0 => mutex.lock().await,
			0 => mutex.try_lock().map_err(|_| Error::lock_acquire_timeout(name))?,
			t => tokio::time::timeout(Duration::from_millis(t as u64), mutex.lock())
				.await
				.map_err(|_| Error::lock_acquire_timeout(name))?,
		};

		let result = run_with_held(name, f()).await;
		drop(guard);
		Ok(result)
	}
}

fn already_held(name: &str) -> bool {
	HELD.try_with(|held| held.borrow().contains(name)).unwrap_or(false)
}

async fn run_with_held<Fut, T>(name: &str, fut: Fut) -> T
where
	Fut: Future<Output = T>,
{
	if HELD.try_with(|_| ()).is_ok() {
		HELD.with(|held| held.borrow_mut().insert(name.to_string()));
		let result = fut.await;
		HELD.with(|held| held.borrow_mut().remove(name));
		result
	} else {
		let mut set = std::collections::HashSet::new();
		set.insert(name.to_string());
		HELD.scope(std::cell::RefCell::new(set), fut).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn runs_exclusively() {
		let registry = LockRegistry::new();
		let result = registry.with_lock("session", 1000, || async { 42 }).await.unwrap();
		assert_eq!(result, 42);
	}

	#[tokio::test]
	async fn fails_fast_when_held() {
		let registry = Arc::new(LockRegistry::new());
		let registry2 = registry.clone();
		let (tx, rx) = tokio::sync::oneshot::channel::<()>();
		let holder = tokio::spawn(async move {
			registry2
				.with_lock("session", -1, || async move {
					rx.await.ok();
				})
				.await
				.unwrap();
		});
		tokio::task::yield_now().await;
		let outcome = registry.with_lock("session", 0, || async { 1 }).await;
		assert!(outcome.is_err());
		tx.send(()).ok();
		holder.await.unwrap();
	}

	#[tokio::test]
	async fn reentrant_call_does_not_deadlock() {
		let registry = Arc::new(LockRegistry::new());
		let outer = registry.clone();
		outer
			.with_lock("session", -1, || async {
				let inner_result = registry.with_lock("session", -1, || async { 7 }).await.unwrap();
				assert_eq!(inner_result, 7);
			})
			.await
			.unwrap();
	}
}

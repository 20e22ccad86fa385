//! Subscription registry / event bus for auth state changes.
//!
//! Dispatch runs on a dedicated task per emission, exactly as the design
//! notes call for, so that a slow or panicking user callback cannot block
//! the Session Engine. Each subscription is delivered events in
//! registration-relative FIFO order via its own unbounded channel and a
//! draining task.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::session::Session;

/// Events the Session Engine emits to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthChangeEvent {
	InitialSession,
	SignedIn,
	SignedOut,
	TokenRefreshed,
	UserUpdated,
	PasswordRecovery,
	MfaChallengeVerified,
}

/// A callback registered via `on_auth_state_change`.
pub type Callback = Arc<dyn Fn(AuthChangeEvent, Option<Session>) + Send + Sync>;

/// A handle returned from registering a callback; dropping or calling
/// [`Subscription::unsubscribe`] stops delivery.
pub struct Subscription {
	id: u64,
	bus: Arc<EventBusInner>,
}

impl Subscription {
	/// Unregisters the callback. Idempotent.
	pub fn unsubscribe(&self) {
		self.bus.remove(self.id);
	}

	/// The subscription's stable id.
	pub fn id(&self) -> u64 {
		self.id
	}
}

struct Entry {
	id: u64,
	callback: Callback,
	queue: tokio::sync::mpsc::UnboundedSender<(AuthChangeEvent, Option<Session>)>,
}

struct EventBusInner {
	next_id: AtomicU64,
	entries: Mutex<Vec<Entry>>,
}

impl EventBusInner {
	fn remove(&self, id: u64) {
		if let Ok(mut entries) = self.entries.try_lock() {
			entries.retain(|e| e.id != id);
		}
	}
}

/// Registry of `on_auth_state_change` subscribers.
pub struct EventBus {
	inner: Arc<EventBusInner>,
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new()
	}
}

impl EventBus {
	pub fn new() -> Self {
		Self {
			inner: Arc::new(EventBusInner {
				next_id: AtomicU64::new(1),
				entries: Mutex::new(Vec::new()),
			}),
		}
	}

	/// Registers a callback. `INITIAL_SESSION` with `current` is delivered
	/// asynchronously, exactly once, before any subsequently emitted event.
	pub async fn subscribe<F>(&self, callback: F, current: Option<Session>) -> Subscription
	where
		F: Fn(AuthChangeEvent, Option<Session>) + Send + Sync + 'static,
	{
		let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
		let callback: Callback = Arc::new(callback);
		let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
		let drain_callback = callback.clone();
		tokio::spawn(async move {
			while let Some((event, session)) = rx.recv().await {
				let callback = drain_callback.clone();
				let result = std::panic::catch_unwind(AssertUnwindSafe(|| callback(event, session)));
				if let Err(panic) = result {
					tracing::warn!(?panic, "auth state change listener panicked");
				}
			}
		});
		tx.send((AuthChangeEvent::InitialSession, current)).ok();
		self.inner.entries.lock().await.push(Entry {
			id,
			callback,
			queue: tx,
		});
		Subscription {
			id,
			bus: self.inner.clone(),
		}
	}

	/// Emits an event to every live subscriber, in registration order.
	pub async fn emit(&self, event: AuthChangeEvent, session: Option<Session>) {
		let entries = self.inner.entries.lock().await;
		for entry in entries.iter() {
			if entry.queue.send((event.clone(), session.clone())).is_err() {
				tracing::warn!("auth listener queue closed unexpectedly");
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::AtomicUsize;

	#[tokio::test]
	async fn initial_session_is_delivered_once() {
		let bus = EventBus::new();
		let seen = Arc::new(AtomicUsize::new(0));
		let seen_clone = seen.clone();
		let _sub = bus
			.subscribe(
				move |event, _session| {
					if event == AuthChangeEvent::InitialSession {
						seen_clone.fetch_add(1, Ordering::SeqCst);
					}
				},
				None,
			)
			.await;
		tokio::task::yield_now().await;
		tokio::time::sleep(std::time::Duration::from_millis(10)).await;
		assert_eq!(seen.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn unsubscribe_stops_delivery() {
		let bus = EventBus::new();
		let count = Arc::new(AtomicUsize::new(0));
		let count_clone = count.clone();
		let sub = bus.subscribe(move |_, _| { count_clone.fetch_add(1, Ordering::SeqCst); }, None).await;
		sub.unsubscribe();
		bus.emit(AuthChangeEvent::SignedOut, None).await;
		tokio::time::sleep(std::time::Duration::from_millis(10)).await;
		assert_eq!(count.load(Ordering::SeqCst), 1);
	}
}

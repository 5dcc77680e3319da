//! Producer/consumer coordination for streaming verification.
//!
//! A producer keeps publishing a message until a consumer has seen one
//! frame on the application's event stream. The two sides share a
//! [`StopSignal`]; the consumer always stops it, whichever way it exits, so
//! the producer loop is bounded by the consumer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use subproc_protocol::SseEvent;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::stream::EventStream;

/// The pub/sub backend the application fans messages out through.
///
/// Implemented by test code against the real backend; the harness only drives it.
#[async_trait]
pub trait Publisher: Send + Sync {
	/// Publishes `message` to `topic`.
	async fn publish(&self, topic: &str, message: &str) -> Result<()>;

	/// Publishes `message` to every topic in `topics` and waits until the backend accepted it.
	async fn wait_published(&self, message: &str, topics: &[String]) -> Result<()>;
}

/// Shared running flag between a producer and a consumer.
#[derive(Debug, Clone)]
pub struct StopSignal {
	running: Arc<AtomicBool>,
}

impl Default for StopSignal {
	fn default() -> Self {
		Self::new()
	}
}

impl StopSignal {
	pub fn new() -> Self {
		Self {
			running: Arc::new(AtomicBool::new(true)),
		}
	}

	pub fn is_running(&self) -> bool {
		self.running.load(Ordering::Acquire)
	}

	pub fn stop(&self) {
		self.running.store(false, Ordering::Release);
	}

	/// Returns a guard that stops the signal when dropped.
	pub fn guard(&self) -> StopGuard {
		StopGuard(self.clone())
	}
}

/// Stops its [`StopSignal`] on drop, including during unwinding.
#[must_use = "the signal stops as soon as the guard is dropped"]
pub struct StopGuard(StopSignal);

impl Drop for StopGuard {
	fn drop(&mut self) {
		self.0.stop();
	}
}

/// Publishes `message` to `topic` every `interval` while `signal` is running.
///
/// The flag is checked once per publish/sleep cycle, so one publish may land
/// after the consumer stopped. Returns the number of publishes. A publish
/// error stops the signal and is returned.
pub async fn run_producer<P>(publisher: &P, topic: &str, message: &str, interval: Duration, signal: &StopSignal) -> Result<usize>
where
	P: Publisher + ?Sized,
{
	let guard = signal.guard();
	let topics = [topic.to_string()];
	let mut published = 0;

	while signal.is_running() {
		publisher.wait_published(message, &topics).await?;
		published += 1;
		trace!(target = "subproc.stream", topic, published, "published");
		tokio::time::sleep(interval).await;
	}

	debug!(target = "subproc.stream", topic, published, "producer stopped");
	drop(guard);
	Ok(published)
}

/// Reads exactly one frame from `events` and stops `signal`.
pub async fn consume_first(events: &mut EventStream<'_>, signal: &StopSignal) -> Result<SseEvent> {
	let _guard = signal.guard();
	match events.next_event().await? {
		Some(event) => {
			debug!(target = "subproc.stream", url = events.url(), event = %event.event, "first frame received");
			Ok(event)
		}
		None => Err(Error::StreamClosed {
			url: events.url().to_string(),
		}),
	}
}

/// Blocking counterpart of [`consume_first`] for iterators such as
/// [`crate::stream::BlockingEvents`].
pub fn consume_first_blocking<I>(mut events: I, signal: &StopSignal) -> Result<SseEvent>
where
	I: Iterator<Item = Result<SseEvent>>,
{
	let _guard = signal.guard();
	match events.next() {
		Some(Ok(event)) => {
			debug!(target = "subproc.stream", event = %event.event, "first frame received");
			Ok(event)
		}
		Some(Err(e)) => Err(e),
		None => Err(Error::StreamClosed {
			url: "blocking event stream".to_string(),
		}),
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::AtomicUsize;

	use super::*;

	#[derive(Default)]
	struct CountingPublisher {
		calls: AtomicUsize,
		fail_after: Option<usize>,
		stop_after: Option<(usize, StopSignal)>,
	}

	#[async_trait]
	impl Publisher for CountingPublisher {
		async fn publish(&self, topic: &str, message: &str) -> Result<()> {
			self.wait_published(message, &[topic.to_string()]).await
		}

		async fn wait_published(&self, _message: &str, topics: &[String]) -> Result<()> {
			let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
			if self.fail_after.is_some_and(|limit| call > limit) {
				return Err(Error::Publish {
					topic: topics.join(","),
					reason: "backend unavailable".into(),
				});
			}
			if let Some((limit, signal)) = &self.stop_after {
				if call >= *limit {
					signal.stop();
				}
			}
			Ok(())
		}
	}

	#[test]
	fn guard_stops_on_drop() {
		let signal = StopSignal::new();
		assert!(signal.is_running());
		{
			let _guard = signal.guard();
			assert!(signal.is_running());
		}
		assert!(!signal.is_running());
	}

	#[test]
	fn clones_share_the_flag() {
		let signal = StopSignal::new();
		let other = signal.clone();
		other.stop();
		assert!(!signal.is_running());
	}

	#[tokio::test]
	async fn producer_runs_until_stopped() {
		let signal = StopSignal::new();
		let publisher = CountingPublisher {
			stop_after: Some((3, signal.clone())),
			..Default::default()
		};

		let published = run_producer(&publisher, "news", "hello", Duration::from_millis(1), &signal)
			.await
			.unwrap();
		assert_eq!(published, 3);
	}

	#[tokio::test]
	async fn producer_does_nothing_when_already_stopped() {
		let signal = StopSignal::new();
		signal.stop();
		let publisher = CountingPublisher::default();

		let published = run_producer(&publisher, "news", "hello", Duration::from_millis(1), &signal)
			.await
			.unwrap();
		assert_eq!(published, 0);
		assert_eq!(publisher.calls.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn publish_failure_stops_the_signal() {
		let signal = StopSignal::new();
		let publisher = CountingPublisher {
			fail_after: Some(2),
			..Default::default()
		};

		let err = run_producer(&publisher, "news", "hello", Duration::from_millis(1), &signal)
			.await
			.unwrap_err();
		assert_eq!(err.phase(), crate::error::Phase::Publish);
		assert!(!signal.is_running());
	}

	#[test]
	fn blocking_consumer_takes_exactly_one_frame() {
		let signal = StopSignal::new();
		let mut frames = vec![
			Ok(SseEvent::new("first").with_event("Notifier")),
			Ok(SseEvent::new("second").with_event("Notifier")),
		]
		.into_iter();

		let event = consume_first_blocking(&mut frames, &signal).unwrap();
		assert_eq!(event.data, "first");
		assert_eq!(event.event, "Notifier");
		assert!(!signal.is_running());
		assert_eq!(frames.next().map(|f| f.unwrap().data), Some("second".to_string()));
	}

	#[test]
	fn blocking_consumer_stops_on_empty_stream() {
		let signal = StopSignal::new();
		let err = consume_first_blocking(std::iter::empty(), &signal).unwrap_err();
		assert!(matches!(err, Error::StreamClosed { .. }));
		assert!(!signal.is_running());
	}

	#[test]
	fn blocking_consumer_stops_on_read_error() {
		let signal = StopSignal::new();
		let frames = std::iter::once(Err(Error::StreamClosed { url: "x".into() }));
		assert!(consume_first_blocking(frames, &signal).is_err());
		assert!(!signal.is_running());
	}
}

//! In-process pub/sub backend: one broadcast channel per topic.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, trace};

pub const DEFAULT_CAPACITY: usize = 64;

/// Fans published messages out to every subscriber of a topic.
///
/// Topics are created on first subscription. Messages published to a topic
/// nobody listens on are dropped, as with any fire-and-forget pub/sub.
pub struct ChannelHub {
	capacity: usize,
	topics: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl Default for ChannelHub {
	fn default() -> Self {
		Self::new(DEFAULT_CAPACITY)
	}
}

impl ChannelHub {
	pub fn new(capacity: usize) -> Self {
		Self {
			capacity: capacity.max(1),
			topics: Mutex::new(HashMap::new()),
		}
	}

	pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<String> {
		let mut topics = self.topics.lock();
		let receiver = match topics.get(topic) {
			Some(sender) => sender.subscribe(),
			None => {
				let (sender, receiver) = broadcast::channel(self.capacity);
				topics.insert(topic.to_string(), sender);
				receiver
			}
		};
		debug!(target = "notify.channels", topic, "subscribed");
		receiver
	}

	/// Publishes `data` to each of `channels`; returns how many receivers it reached.
	pub fn publish(&self, data: &str, channels: &[String]) -> usize {
		let mut topics = self.topics.lock();
		let mut delivered = 0;
		for channel in channels {
			let Some(sender) = topics.get(channel) else {
				continue;
			};
			match sender.send(data.to_string()) {
				Ok(receivers) => delivered += receivers,
				Err(_) => {
					topics.remove(channel);
				}
			}
		}
		trace!(target = "notify.channels", ?channels, delivered, "published");
		delivered
	}

	pub fn subscriber_count(&self, topic: &str) -> usize {
		self.topics.lock().get(topic).map_or(0, broadcast::Sender::receiver_count)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn topics(names: &[&str]) -> Vec<String> {
		names.iter().map(|n| n.to_string()).collect()
	}

	#[tokio::test]
	async fn subscribers_receive_published_messages() {
		let hub = ChannelHub::default();
		let mut first = hub.subscribe("news");
		let mut second = hub.subscribe("news");

		assert_eq!(hub.publish("hello", &topics(&["news"])), 2);
		assert_eq!(first.recv().await.unwrap(), "hello");
		assert_eq!(second.recv().await.unwrap(), "hello");
	}

	#[test]
	fn publishing_without_subscribers_reaches_nobody() {
		let hub = ChannelHub::default();
		assert_eq!(hub.publish("hello", &topics(&["news"])), 0);
	}

	#[test]
	fn abandoned_topics_are_pruned() {
		let hub = ChannelHub::default();
		drop(hub.subscribe("news"));
		assert_eq!(hub.publish("hello", &topics(&["news"])), 0);
		assert_eq!(hub.subscriber_count("news"), 0);
		assert!(hub.topics.lock().is_empty());
	}

	#[tokio::test]
	async fn one_publish_reaches_several_topics() {
		let hub = ChannelHub::default();
		let mut news = hub.subscribe("news");
		let mut alerts = hub.subscribe("alerts");

		assert_eq!(hub.publish("both", &topics(&["news", "alerts", "unknown"])), 2);
		assert_eq!(news.recv().await.unwrap(), "both");
		assert_eq!(alerts.recv().await.unwrap(), "both");
	}
}

#![allow(dead_code)]

use std::time::Duration;

use async_trait::async_trait;
use notify_demo::{PublishRequest, PublishResponse};
use subproc::{Error, HarnessConfig, LaunchSpec, Publisher};

pub const TOPIC: &str = "demo";
pub const MESSAGE: &str = "hello";
pub const PUBLISH_INTERVAL: Duration = Duration::from_millis(100);

/// The demo server binary built for this test run.
pub fn demo_spec() -> LaunchSpec {
	LaunchSpec::new(env!("CARGO_MANIFEST_DIR"), env!("CARGO_BIN_EXE_notify-demo")).arg("-v")
}

pub fn config() -> HarnessConfig {
	HarnessConfig::from_env()
		.with_grace_period(Duration::from_secs(3))
		.with_request_timeout(Some(Duration::from_secs(20)))
}

/// Publishes through the running server's `/publish` endpoint.
pub struct ChannelsPublisher {
	client: reqwest::Client,
	url: String,
}

impl ChannelsPublisher {
	pub fn new(base_url: &str) -> Self {
		Self {
			client: reqwest::Client::new(),
			url: format!("{}/publish", base_url.trim_end_matches('/')),
		}
	}

	fn failure(topics: &[String], reason: impl ToString) -> Error {
		Error::Publish {
			topic: topics.join(","),
			reason: reason.to_string(),
		}
	}
}

#[async_trait]
impl Publisher for ChannelsPublisher {
	async fn publish(&self, topic: &str, message: &str) -> subproc::Result<()> {
		self.wait_published(message, &[topic.to_string()]).await
	}

	async fn wait_published(&self, message: &str, topics: &[String]) -> subproc::Result<()> {
		let request = PublishRequest {
			data: message.to_string(),
			channels: topics.to_vec(),
		};
		let response = self
			.client
			.post(&self.url)
			.json(&request)
			.send()
			.await
			.map_err(|e| Self::failure(topics, e))?;

		if !response.status().is_success() {
			return Err(Self::failure(topics, format!("backend answered {}", response.status())));
		}
		response
			.json::<PublishResponse>()
			.await
			.map(|_| ())
			.map_err(|e| Self::failure(topics, e))
	}
}

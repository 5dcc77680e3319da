//! HTTP surface of the notification server.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::channels::ChannelHub;
use crate::cli::Args;

/// SSE event type carried by every notification frame.
pub const NOTIFY_EVENT: &str = "Notifier";

#[derive(Clone)]
pub struct AppState {
	pub hub: Arc<ChannelHub>,
	/// Cancelled on shutdown; ends every open event stream.
	pub shutdown: CancellationToken,
	pub keep_alive: Duration,
}

impl AppState {
	pub fn new(hub: ChannelHub, keep_alive: Duration) -> Self {
		Self {
			hub: Arc::new(hub),
			shutdown: CancellationToken::new(),
			keep_alive,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
	pub data: String,
	#[serde(default)]
	pub channels: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResponse {
	pub delivered: usize,
}

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/notify/{topic}", get(notify))
		.route("/publish", post(publish))
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}

async fn health() -> Json<serde_json::Value> {
	Json(serde_json::json!({ "status": "healthy" }))
}

/// Streams every message published to `topic` until the client leaves or the server stops.
async fn notify(State(state): State<AppState>, Path(topic): Path<String>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
	info!(target = "notify.server", %topic, "subscriber connected");

	let lagging_topic = topic.clone();
	let events = BroadcastStream::new(state.hub.subscribe(&topic)).filter_map(move |item| match item {
		Ok(data) => Some(Ok(Event::default().event(NOTIFY_EVENT).data(data))),
		Err(BroadcastStreamRecvError::Lagged(skipped)) => {
			warn!(target = "notify.server", topic = %lagging_topic, skipped, "subscriber lagged");
			None
		}
	});
	let events = futures::StreamExt::take_until(events, state.shutdown.clone().cancelled_owned());

	Sse::new(events).keep_alive(KeepAlive::new().interval(state.keep_alive).text("ping"))
}

async fn publish(
	State(state): State<AppState>,
	Json(request): Json<PublishRequest>,
) -> Result<Json<PublishResponse>, (StatusCode, String)> {
	if request.channels.is_empty() {
		return Err((StatusCode::BAD_REQUEST, "at least one channel is required".to_string()));
	}
	let delivered = state.hub.publish(&request.data, &request.channels);
	debug!(target = "notify.server", channels = ?request.channels, delivered, "message published");
	Ok(Json(PublishResponse { delivered }))
}

/// Runs the server until SIGINT or SIGTERM.
pub async fn run(args: Args) -> anyhow::Result<()> {
	if args.startup_delay_ms > 0 {
		info!(target = "notify.server", delay_ms = args.startup_delay_ms, "delaying startup");
		tokio::time::sleep(Duration::from_millis(args.startup_delay_ms)).await;
	}

	let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port))
		.await
		.with_context(|| format!("failed to bind {}:{}", args.host, args.port))?;
	let addr = listener.local_addr().context("listener has no local address")?;

	let state = AppState::new(ChannelHub::new(args.channel_capacity), Duration::from_secs(args.keep_alive_secs));
	let shutdown = state.shutdown.clone();

	info!(target = "notify.server", %addr, "listening");
	axum::serve(listener, router(state))
		.with_graceful_shutdown(async move {
			shutdown_signal().await;
			shutdown.cancel();
		})
		.await
		.context("server error")?;

	info!(target = "notify.server", "shutdown complete");
	Ok(())
}

async fn shutdown_signal() {
	let terminate = async {
		#[cfg(unix)]
		{
			use tokio::signal::unix::{SignalKind, signal};
			match signal(SignalKind::terminate()) {
				Ok(mut sigterm) => {
					sigterm.recv().await;
				}
				Err(e) => {
					warn!(target = "notify.server", error = %e, "SIGTERM handler unavailable");
					std::future::pending::<()>().await;
				}
			}
		}
		#[cfg(not(unix))]
		std::future::pending::<()>().await;
	};

	tokio::select! {
		_ = tokio::signal::ctrl_c() => info!(target = "notify.server", "received SIGINT, shutting down"),
		_ = terminate => info!(target = "notify.server", "received SIGTERM, shutting down"),
	}
}

#[cfg(test)]
mod tests {
	use axum::body::Body;
	use axum::http::{Request, header};
	use eventsource_stream::Eventsource;
	use http_body_util::BodyExt;
	use tower::ServiceExt;

	use super::*;

	fn state() -> AppState {
		AppState::new(ChannelHub::default(), Duration::from_secs(15))
	}

	fn publish_request(body: serde_json::Value) -> Request<Body> {
		Request::builder()
			.method("POST")
			.uri("/publish")
			.header(header::CONTENT_TYPE, "application/json")
			.body(Body::from(body.to_string()))
			.unwrap()
	}

	#[tokio::test]
	async fn health_reports_healthy() {
		let response = router(state())
			.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
			.await
			.unwrap();

		assert_eq!(response.status(), StatusCode::OK);
		let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
		let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
		assert_eq!(json["status"], "healthy");
	}

	#[tokio::test]
	async fn publish_requires_a_channel() {
		let response = router(state())
			.oneshot(publish_request(serde_json::json!({ "data": "hello" })))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn publish_reports_delivery_count() {
		let state = state();
		let _subscriber = state.hub.subscribe("demo");

		let response = router(state)
			.oneshot(publish_request(serde_json::json!({ "data": "hello", "channels": ["demo"] })))
			.await
			.unwrap();

		assert_eq!(response.status(), StatusCode::OK);
		let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
		let reply: PublishResponse = serde_json::from_slice(&body).unwrap();
		assert_eq!(reply, PublishResponse { delivered: 1 });
	}

	#[tokio::test]
	async fn notify_streams_published_messages_until_shutdown() {
		let state = state();
		let response = router(state.clone())
			.oneshot(Request::builder().uri("/notify/demo").body(Body::empty()).unwrap())
			.await
			.unwrap();

		assert_eq!(response.status(), StatusCode::OK);
		let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
		assert!(content_type.starts_with("text/event-stream"), "{content_type}");
		assert_eq!(state.hub.subscriber_count("demo"), 1);

		assert_eq!(state.hub.publish("hello", &["demo".to_string()]), 1);

		let mut body = response.into_body();
		let frame = body.frame().await.unwrap().unwrap().into_data().unwrap();
		let mut events = futures::stream::iter([Ok::<_, Infallible>(frame)]).eventsource();
		let event = events.next().await.expect("one complete frame").unwrap();
		assert_eq!(event.event, NOTIFY_EVENT);
		assert_eq!(event.data, "hello");

		state.shutdown.cancel();
		assert!(body.frame().await.is_none(), "stream should end on shutdown");
	}
}

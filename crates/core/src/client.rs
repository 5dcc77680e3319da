//! HTTP client factory bound to a launched application's base URL.
//!
//! One factory, [`build_client`], produces either transport. The blocking
//! client owns an internal runtime thread and must be created, used and
//! dropped outside any tokio context.

use std::fmt;

use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE, HeaderValue};
use reqwest::{Method, StatusCode};
use tracing::debug;
use url::Url;

use crate::config::HarnessConfig;
use crate::error::{Error, Result};
use crate::stream::{BlockingEvents, EventStream};

const EVENT_STREAM: &str = "text/event-stream";

/// Which execution model a client uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportMode {
	/// Calls block the current thread.
	Blocking,
	/// Calls are futures driven by a tokio runtime.
	NonBlocking,
}

impl fmt::Display for TransportMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TransportMode::Blocking => write!(f, "blocking"),
			TransportMode::NonBlocking => write!(f, "non-blocking"),
		}
	}
}

/// A client of either transport, tagged with its mode.
#[derive(Debug)]
pub enum ClientHandle {
	Blocking(BlockingClient),
	NonBlocking(AsyncClient),
}

impl ClientHandle {
	pub fn mode(&self) -> TransportMode {
		match self {
			ClientHandle::Blocking(_) => TransportMode::Blocking,
			ClientHandle::NonBlocking(_) => TransportMode::NonBlocking,
		}
	}

	pub fn base_url(&self) -> &Url {
		match self {
			ClientHandle::Blocking(client) => client.base_url(),
			ClientHandle::NonBlocking(client) => client.base_url(),
		}
	}

	pub fn as_blocking(&self) -> Option<&BlockingClient> {
		match self {
			ClientHandle::Blocking(client) => Some(client),
			ClientHandle::NonBlocking(_) => None,
		}
	}

	pub fn as_async(&self) -> Option<&AsyncClient> {
		match self {
			ClientHandle::NonBlocking(client) => Some(client),
			ClientHandle::Blocking(_) => None,
		}
	}
}

/// Builds a client of the requested `mode` whose requests resolve against `base_url`.
///
/// No request is sent; a malformed URL is the only way this fails besides
/// the TLS backend refusing to initialise.
pub fn build_client(base_url: &str, mode: TransportMode, config: &HarnessConfig) -> Result<ClientHandle> {
	let base_url = parse_base_url(base_url)?;
	debug!(target = "subproc.session", %base_url, %mode, "building client");

	match mode {
		TransportMode::Blocking => {
			let inner = reqwest::blocking::Client::builder()
				.connect_timeout(config.connect_timeout)
				.timeout(config.request_timeout)
				.build()
				.map_err(Error::ClientBuild)?;
			Ok(ClientHandle::Blocking(BlockingClient { inner, base_url }))
		}
		TransportMode::NonBlocking => {
			let mut builder = reqwest::Client::builder().connect_timeout(config.connect_timeout);
			if let Some(timeout) = config.request_timeout {
				builder = builder.timeout(timeout);
			}
			let inner = builder.build().map_err(Error::ClientBuild)?;
			Ok(ClientHandle::NonBlocking(AsyncClient { inner, base_url }))
		}
	}
}

fn parse_base_url(raw: &str) -> Result<Url> {
	let invalid = |reason: String| Error::InvalidBaseUrl {
		url: raw.to_string(),
		reason,
	};

	let mut url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
	if !matches!(url.scheme(), "http" | "https") {
		return Err(invalid(format!("unsupported scheme {}", url.scheme())));
	}
	if url.host().is_none() {
		return Err(invalid("missing host".to_string()));
	}
	// Relative joins must keep any path prefix.
	if !url.path().ends_with('/') {
		let path = format!("{}/", url.path());
		url.set_path(&path);
	}
	Ok(url)
}

fn join(base: &Url, path: &str) -> Url {
	match base.join(path.trim_start_matches('/')) {
		Ok(url) => url,
		Err(_) => base.clone(),
	}
}

fn check_event_stream(url: &Url, status: StatusCode, content_type: Option<&HeaderValue>) -> Result<()> {
	if !status.is_success() {
		return Err(Error::UnexpectedStatus {
			url: url.to_string(),
			status,
		});
	}
	let content_type = content_type.and_then(|v| v.to_str().ok()).unwrap_or_default();
	if !content_type.starts_with(EVENT_STREAM) {
		return Err(Error::NotEventStream {
			url: url.to_string(),
			content_type: content_type.to_string(),
		});
	}
	Ok(())
}

/// Non-blocking client; every call is a future.
#[derive(Debug, Clone)]
pub struct AsyncClient {
	inner: reqwest::Client,
	base_url: Url,
}

impl AsyncClient {
	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	/// Resolves `path` against the base URL.
	pub fn url(&self, path: &str) -> Url {
		join(&self.base_url, path)
	}

	pub fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
		self.inner.request(method, self.url(path))
	}

	pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
		self.request(Method::GET, path)
	}

	pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
		self.request(Method::POST, path)
	}

	/// Opens an SSE stream at `path`.
	pub async fn connect_sse(&self, path: &str) -> Result<EventStream<'_>> {
		let url = self.url(path);
		let response = self
			.get(path)
			.header(ACCEPT, EVENT_STREAM)
			.header(CACHE_CONTROL, "no-store")
			.send()
			.await
			.map_err(|source| Error::Transport {
				url: url.to_string(),
				source,
			})?;

		check_event_stream(&url, response.status(), response.headers().get(CONTENT_TYPE))?;
		debug!(target = "subproc.stream", %url, "event stream open");
		Ok(EventStream::new(url.to_string(), response))
	}
}

/// Blocking client; every call blocks the current thread.
#[derive(Debug, Clone)]
pub struct BlockingClient {
	inner: reqwest::blocking::Client,
	base_url: Url,
}

impl BlockingClient {
	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	/// Resolves `path` against the base URL.
	pub fn url(&self, path: &str) -> Url {
		join(&self.base_url, path)
	}

	pub fn request(&self, method: Method, path: &str) -> reqwest::blocking::RequestBuilder {
		self.inner.request(method, self.url(path))
	}

	pub fn get(&self, path: &str) -> reqwest::blocking::RequestBuilder {
		self.request(Method::GET, path)
	}

	pub fn post(&self, path: &str) -> reqwest::blocking::RequestBuilder {
		self.request(Method::POST, path)
	}

	/// Opens an SSE stream at `path`; the returned iterator blocks on each frame.
	pub fn connect_sse(&self, path: &str) -> Result<BlockingEvents<'_>> {
		let url = self.url(path);
		let response = self
			.get(path)
			.header(ACCEPT, EVENT_STREAM)
			.header(CACHE_CONTROL, "no-store")
			.send()
			.map_err(|source| Error::Transport {
				url: url.to_string(),
				source,
			})?;

		check_event_stream(&url, response.status(), response.headers().get(CONTENT_TYPE))?;
		debug!(target = "subproc.stream", %url, "event stream open");
		Ok(BlockingEvents::new(url.to_string(), response))
	}
}

//! Lazy SSE readers over open HTTP responses.
//!
//! Both readers borrow the client that opened them, so a stream can never
//! outlive its transport. Neither assumes the server ends the stream: callers
//! stop reading, and the request timeout bounds a stream that never yields.
//!
//! Frames are parsed by `eventsource-stream`. The async reader feeds it the
//! response's byte stream directly; the blocking reader wraps its body in a
//! chunk iterator and drives the same parser with `block_on_stream`.

use std::io::{self, Read};
use std::marker::PhantomData;

use bytes::Bytes;
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::executor::{BlockingStream, block_on_stream};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use subproc_protocol::{DEFAULT_EVENT_TYPE, SseEvent};
use tracing::trace;

use crate::client::{AsyncClient, BlockingClient};
use crate::error::{Error, Result};

const READ_CHUNK: usize = 4 * 1024;

type Frames<E> = BoxStream<'static, std::result::Result<Event, EventStreamError<E>>>;

fn frames<S, E>(body: S) -> Frames<E>
where
	S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
	E: Send + 'static,
{
	close_trailing_cr(body.boxed()).eventsource().boxed()
}

/// A CR at the very end of the body ends its line. The parser holds a lone
/// CR back waiting for a possible LF, so one is supplied at end of body.
fn close_trailing_cr<E>(body: BoxStream<'static, std::result::Result<Bytes, E>>) -> impl Stream<Item = std::result::Result<Bytes, E>> + Send
where
	E: Send + 'static,
{
	stream::unfold((body.fuse(), false), |(mut body, ends_in_cr)| async move {
		match body.next().await {
			Some(Ok(chunk)) => {
				let ends_in_cr = chunk.last().map_or(ends_in_cr, |&byte| byte == b'\r');
				Some((Ok(chunk), (body, ends_in_cr)))
			}
			Some(Err(e)) => Some((Err(e), (body, false))),
			None if ends_in_cr => Some((Ok(Bytes::from_static(b"\n")), (body, false))),
			None => None,
		}
	})
}

fn to_sse_event(event: Event) -> SseEvent {
	SseEvent {
		event: if event.event.is_empty() { DEFAULT_EVENT_TYPE.to_string() } else { event.event },
		data: event.data,
		id: Some(event.id).filter(|id| !id.is_empty()),
		retry: event.retry.map(|delay| u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)),
	}
}

/// Events read from a non-blocking response.
pub struct EventStream<'a> {
	url: String,
	frames: Frames<reqwest::Error>,
	done: bool,
	_client: PhantomData<&'a AsyncClient>,
}

impl<'a> EventStream<'a> {
	pub(crate) fn new(url: String, response: reqwest::Response) -> Self {
		Self::from_body(url, response.bytes_stream())
	}

	fn from_body<S>(url: String, body: S) -> Self
	where
		S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
	{
		Self {
			url,
			frames: frames(body),
			done: false,
			_client: PhantomData,
		}
	}

	pub fn url(&self) -> &str {
		&self.url
	}

	/// Waits for the next complete event; `None` once the server closes the stream.
	pub async fn next_event(&mut self) -> Result<Option<SseEvent>> {
		if self.done {
			return Ok(None);
		}
		match self.frames.next().await {
			Some(Ok(event)) => {
				trace!(target = "subproc.stream", url = %self.url, event = %event.event, "event");
				Ok(Some(to_sse_event(event)))
			}
			Some(Err(EventStreamError::Transport(source))) => {
				self.done = true;
				Err(Error::Transport {
					url: self.url.clone(),
					source,
				})
			}
			Some(Err(e)) => {
				self.done = true;
				Err(Error::MalformedEvent {
					url: self.url.clone(),
					reason: e.to_string(),
				})
			}
			None => {
				self.done = true;
				Ok(None)
			}
		}
	}

	/// Adapts the reader into a [`Stream`] of events.
	pub fn into_stream(self) -> impl Stream<Item = Result<SseEvent>> + 'a {
		stream::unfold(self, |mut events| async move {
			match events.next_event().await {
				Ok(Some(event)) => Some((Ok(event), events)),
				Ok(None) => None,
				Err(e) => Some((Err(e), events)),
			}
		})
	}
}

/// Reads a blocking body in chunks of whatever size arrives.
struct BodyChunks<R> {
	body: R,
	failed: bool,
}

impl<R: Read> Iterator for BodyChunks<R> {
	type Item = io::Result<Bytes>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.failed {
			return None;
		}
		let mut chunk = vec![0u8; READ_CHUNK];
		loop {
			match self.body.read(&mut chunk) {
				Ok(0) => return None,
				Ok(n) => {
					chunk.truncate(n);
					return Some(Ok(Bytes::from(chunk)));
				}
				Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
				Err(e) => {
					self.failed = true;
					return Some(Err(e));
				}
			}
		}
	}
}

/// Events read from a blocking response; each `next` blocks until a frame arrives.
pub struct BlockingEvents<'a> {
	url: String,
	frames: BlockingStream<Frames<io::Error>>,
	done: bool,
	_client: PhantomData<&'a BlockingClient>,
}

impl<'a> BlockingEvents<'a> {
	pub(crate) fn new(url: String, response: reqwest::blocking::Response) -> Self {
		Self::from_reader(url, response)
	}

	fn from_reader<R>(url: String, body: R) -> Self
	where
		R: Read + Send + 'static,
	{
		let chunks = stream::iter(BodyChunks { body, failed: false });
		Self {
			url,
			frames: block_on_stream(frames(chunks)),
			done: false,
			_client: PhantomData,
		}
	}

	pub fn url(&self) -> &str {
		&self.url
	}
}

impl Iterator for BlockingEvents<'_> {
	type Item = Result<SseEvent>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.done {
			return None;
		}
		match self.frames.next() {
			Some(Ok(event)) => {
				trace!(target = "subproc.stream", url = %self.url, event = %event.event, "event");
				Some(Ok(to_sse_event(event)))
			}
			Some(Err(EventStreamError::Transport(source))) => {
				self.done = true;
				Some(Err(Error::StreamRead {
					url: self.url.clone(),
					source,
				}))
			}
			Some(Err(e)) => {
				self.done = true;
				Some(Err(Error::MalformedEvent {
					url: self.url.clone(),
					reason: e.to_string(),
				}))
			}
			None => {
				self.done = true;
				None
			}
		}
	}
}

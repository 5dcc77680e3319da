//! Background capture of a child's stdout/stderr into bounded buffers.

use std::io::{self, Read};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

const READ_CHUNK: usize = 8 * 1024;
const FINISH_POLL: Duration = Duration::from_millis(5);

/// Tail buffer filled by a dedicated reader thread until the pipe closes.
pub(crate) struct OutputCapture {
	name: &'static str,
	buffer: Arc<Mutex<Vec<u8>>>,
	reader: Option<JoinHandle<()>>,
}

impl OutputCapture {
	/// Starts draining `source` on a new thread, keeping at most `limit` bytes.
	pub(crate) fn spawn<R>(name: &'static str, mut source: R, limit: usize) -> io::Result<Self>
	where
		R: Read + Send + 'static,
	{
		let buffer = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&buffer);

		let reader = std::thread::Builder::new()
			.name(format!("subproc-{name}"))
			.spawn(move || {
				let mut chunk = [0u8; READ_CHUNK];
				loop {
					match source.read(&mut chunk) {
						Ok(0) => break,
						Ok(n) => append_bounded(&mut sink.lock(), &chunk[..n], limit),
						Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
						Err(e) => {
							trace!(target = "subproc.launch", stream = name, error = %e, "capture read failed");
							break;
						}
					}
				}
			})?;

		Ok(Self {
			name,
			buffer,
			reader: Some(reader),
		})
	}

	/// An empty capture for streams that were not piped.
	pub(crate) fn empty(name: &'static str) -> Self {
		Self {
			name,
			buffer: Arc::new(Mutex::new(Vec::new())),
			reader: None,
		}
	}

	pub(crate) fn name(&self) -> &'static str {
		self.name
	}

	/// Lossy UTF-8 copy of what has been captured so far.
	pub(crate) fn text(&self) -> String {
		String::from_utf8_lossy(&self.buffer.lock()).into_owned()
	}

	/// Waits up to `timeout` for the reader to hit end of file.
	///
	/// Returns `false` when the reader is still blocked (a descendant kept the
	/// pipe open); the thread is then detached.
	pub(crate) fn finish(&mut self, timeout: Duration) -> bool {
		let Some(reader) = self.reader.take() else {
			return true;
		};

		let deadline = Instant::now() + timeout;
		while !reader.is_finished() {
			if Instant::now() >= deadline {
				return false;
			}
			std::thread::sleep(FINISH_POLL);
		}
		let _ = reader.join();
		true
	}

	/// [`Self::finish`] that sleeps on the tokio timer between checks.
	pub(crate) async fn finish_async(&mut self, timeout: Duration) -> bool {
		let deadline = Instant::now() + timeout;
		while self.reader.as_ref().is_some_and(|reader| !reader.is_finished()) {
			if Instant::now() >= deadline {
				self.reader = None;
				return false;
			}
			tokio::time::sleep(FINISH_POLL).await;
		}
		self.finish(Duration::ZERO)
	}

	/// Drops the captured bytes, returning how many were discarded.
	pub(crate) fn discard(&self) -> usize {
		let mut buffer = self.buffer.lock();
		let len = buffer.len();
		buffer.clear();
		buffer.shrink_to_fit();
		len
	}
}

fn append_bounded(buffer: &mut Vec<u8>, chunk: &[u8], limit: usize) {
	buffer.extend_from_slice(chunk);
	if buffer.len() > limit {
		let excess = buffer.len() - limit;
		buffer.drain(..excess);
	}
}

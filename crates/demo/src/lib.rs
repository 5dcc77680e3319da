//! Notification server exercised by the subprocess harness tests.
//!
//! Clients subscribe to a topic with `GET /notify/{topic}` and receive every
//! message later posted to `POST /publish` as a `Notifier` server-sent event.
//! The stream never ends on its own; only client disconnect or server
//! shutdown closes it.

pub mod channels;
pub mod cli;
pub mod logging;
pub mod server;

pub use channels::ChannelHub;
pub use server::{NOTIFY_EVENT, PublishRequest, PublishResponse};

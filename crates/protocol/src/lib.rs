//! Wire types for server-sent event streams.
//!
//! This crate contains the event type delivered by `text/event-stream`
//! responses. It performs no I/O and no parsing: `subproc-harness` decodes
//! response bodies with `eventsource-stream` and hands out [`SseEvent`]s.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data with serde derives
//! * 1:1 with the wire format: one value per dispatched event
//! * Transport agnostic: blocking and async readers yield the same type

pub mod sse;

pub use sse::*;

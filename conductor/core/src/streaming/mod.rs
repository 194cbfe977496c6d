//! Stream Switching for Multi-Call Responses
//!
//! A single model call may stop because it ran out of output tokens. The
//! conductor then issues a continuation call, and the client must still see
//! one uninterrupted response body. The [`StreamSwitcher`] provides that
//! single body while its upstream source is replaced behind it.
//!
//! # Architecture
//!
//! ```text
//!   source 0 ──▶ pump ─┐
//!   source 1 ──▶ pump ─┼──▶ [ 1-slot channel ] ──▶ SwitchedStream ──▶ HTTP body
//!   source n ──▶ pump ─┘
//!        (one pump alive at a time)
//! ```
//!
//! # Guarantees
//!
//! - Bytes reach the downstream in production order; sources never overlap
//! - At most one chunk is in transit between a pump and the reader
//! - The downstream ends exactly once: cleanly on close, or after one error
//! - Dropping the downstream cancels the active upstream read

mod switcher;

pub use switcher::{ByteSource, StreamSwitcher, SwitchCount, SwitchError, SwitchedStream};

//! Client side of the live-update pipeline.
//!
//! ```text
//! HttpTransport (SSE decode)
//!       |
//! LiveUpdateClient (reconnect state machine, backoff)
//!       |
//! EventRouter (classify_domain)
//!    /    |    \
//! Debounce instances, one per domain -> refresh callbacks
//! ```

mod debounce;
mod router;
mod subscriber;
mod transport;

pub use debounce::Debounce;
pub use router::{Domain, EventRouter, RefreshIntervals, classify_domain};
pub use subscriber::{ConnectionState, LiveUpdateClient, ReconnectPolicy};
pub use transport::{ClientError, EventStream, EventTransport, HttpTransport, SseDecoder};

//! Library level constants

/// Header carrying the keyed integrity tag of a request or response body.
pub const SIGNATURE_HEADER: &str = "X-Tally-Signature";

/// The collector route batches are delivered to.
pub const UPDATES_PATH: &str = "updates/";

/// Default address the collector binds and the agent delivers to.
pub const DEFAULT_ADDRESS: &str = "localhost:8080";

/// Name of the counter the sampler bumps once per tick.
pub const POLL_COUNT: &str = "PollCount";

/// How long a listener blocks waiting for a request before it re-checks its
/// shutdown signal.
pub const ACCEPT_TIMEOUT_MS: u64 = 100;

/// Upper bound on a single delivery request, connect to last byte.
pub const DELIVERY_TIMEOUT_SECS: u64 = 5;

/// Collector statuses the dispatcher treats as transient.
pub const RETRYABLE_STATUSES: [u16; 3] = [502, 503, 504];

/// Largest request body the collector accepts, before and after gunzip.
pub const MAX_BODY_BYTES: u64 = 8 * 1024 * 1024;

//! The agent side of the pipeline.
//!
//! A `Sampler` thread reads a `Probe` on its poll interval and pushes each
//! reading as a batch onto a bounded channel. A `Dispatcher` thread takes at
//! most one batch per report interval off that channel and delivers it to
//! the collector under a `RetryPolicy`.

pub mod dispatcher;
pub mod probe;
pub mod retry;
pub mod sampler;

pub use self::dispatcher::{DeliveryError, Dispatcher, Flush, HttpTransport, Transport};
pub use self::probe::{Probe, SysProbe};
pub use self::retry::{RetryError, RetryPolicy, Retryable};
pub use self::sampler::Sampler;

use crate::metric::Metric;

/// One sampler tick's worth of metrics.
pub type Batch = Vec<Metric>;

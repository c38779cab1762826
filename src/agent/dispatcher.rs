//! Delivery of sampled batches to a collector.

use super::retry::{self, RetryError, RetryPolicy, Retryable};
use super::Batch;
use crate::codec::{self, SigningKey};
use crate::constants;
use crate::thread::Shutdown;
use crossbeam_channel::{Receiver, TryRecvError};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use std::error;
use std::fmt;
use std::time::Duration;
use url::Url;

/// Why a delivery attempt failed.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryError {
    /// The collector answered with a non-success status.
    Status(u16),
    /// The request never completed: connection refused, timed out, ...
    Transport(String),
    /// The batch could not be serialized or compressed.
    Encode(String),
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            DeliveryError::Status(code) => write!(f, "collector answered {}", code),
            DeliveryError::Transport(ref e) => write!(f, "transport failure: {}", e),
            DeliveryError::Encode(ref e) => write!(f, "could not encode batch: {}", e),
        }
    }
}

impl error::Error for DeliveryError {}

impl Retryable for DeliveryError {
    fn is_transient(&self) -> bool {
        match *self {
            DeliveryError::Status(code) => constants::RETRYABLE_STATUSES.contains(&code),
            DeliveryError::Transport(_) => false,
            DeliveryError::Encode(_) => false,
        }
    }
}

/// Something a dispatcher can hand an encoded batch to.
pub trait Transport: Send {
    /// Deliver a gzip-compressed JSON array of metrics, with its integrity
    /// tag when signing is enabled.
    fn send(&mut self, body: &[u8], signature: Option<&str>) -> Result<(), DeliveryError>;
}

/// Delivers batches to a collector's batch endpoint over HTTP.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    endpoint: Url,
}

impl HttpTransport {
    /// A transport posting to the collector at `address`.
    ///
    /// `address` may be a bare `host:port` or a full base URL.
    pub fn new(address: &str) -> Result<HttpTransport, DeliveryError> {
        let base = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };
        let base = if base.ends_with('/') { base } else { base + "/" };
        let endpoint = Url::parse(&base)
            .and_then(|u| u.join(constants::UPDATES_PATH))
            .map_err(|e| DeliveryError::Transport(format!("bad address {}: {}", address, e)))?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(constants::DELIVERY_TIMEOUT_SECS))
            .build()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        Ok(HttpTransport { client, endpoint })
    }

    /// The URL batches are posted to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl Transport for HttpTransport {
    fn send(&mut self, body: &[u8], signature: Option<&str>) -> Result<(), DeliveryError> {
        let mut req = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .body(body.to_vec());
        if let Some(tag) = signature {
            req = req.header(constants::SIGNATURE_HEADER, tag);
        }
        let resp = req
            .send()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status(status.as_u16()))
        }
    }
}

/// An encoded batch, ready for the wire.
#[derive(Debug)]
pub struct Payload {
    /// Gzip-compressed JSON array.
    pub body: Vec<u8>,
    /// Tag over `body` as sent, when a key is configured.
    pub signature: Option<String>,
}

/// What one dispatcher tick accomplished.
#[derive(Debug, PartialEq)]
pub enum Flush {
    /// No batch was waiting.
    Idle,
    /// A batch was delivered, after this many attempts.
    Delivered(u32),
    /// A batch was dropped after exhausting its attempts.
    Dropped,
    /// The sampler side has gone away and nothing is left to send.
    Closed,
    /// Shutdown interrupted delivery; the batch is lost.
    Cancelled,
}

/// The periodic consumer of metric batches.
///
/// Each tick it takes at most one waiting batch, encodes it and delivers it
/// under the retry policy. A batch that cannot be delivered is logged and
/// dropped; the dispatcher itself never fails.
pub struct Dispatcher<T> {
    transport: T,
    inbox: Receiver<Batch>,
    interval: Duration,
    key: Option<SigningKey>,
    policy: RetryPolicy,
}

impl<T> Dispatcher<T>
where
    T: Transport,
{
    /// A dispatcher draining `inbox` every `interval` into `transport`.
    pub fn new(transport: T, inbox: Receiver<Batch>, interval: Duration) -> Dispatcher<T> {
        Dispatcher {
            transport,
            inbox,
            interval,
            key: None,
            policy: RetryPolicy::default(),
        }
    }

    /// Sign every payload with `key`.
    pub fn key(mut self, key: Option<SigningKey>) -> Dispatcher<T> {
        self.key = key;
        self
    }

    /// Retry under `policy` instead of the default schedule.
    pub fn policy(mut self, policy: RetryPolicy) -> Dispatcher<T> {
        self.policy = policy;
        self
    }

    /// Serialize, compress and sign a batch.
    pub fn encode(&self, batch: &[crate::metric::Metric]) -> Result<Payload, DeliveryError> {
        let json = serde_json::to_vec(batch).map_err(|e| DeliveryError::Encode(e.to_string()))?;
        let body = codec::compress(&json).map_err(|e| DeliveryError::Encode(e.to_string()))?;
        let signature = self.key.as_ref().map(|k| k.sign(&body));
        Ok(Payload { body, signature })
    }

    /// Deliver at most one waiting batch.
    pub fn poll(&mut self, shutdown: &Shutdown) -> Flush {
        let batch = match self.inbox.try_recv() {
            Ok(batch) => batch,
            Err(TryRecvError::Empty) => return Flush::Idle,
            Err(TryRecvError::Disconnected) => return Flush::Closed,
        };
        if batch.is_empty() {
            return Flush::Idle;
        }
        let payload = match self.encode(&batch) {
            Ok(p) => p,
            Err(e) => {
                error!("dropping batch of {} metrics: {}", batch.len(), e);
                return Flush::Dropped;
            }
        };
        let policy = &self.policy;
        let transport = &mut self.transport;
        let signature = payload.signature.as_ref().map(|s| s.as_str());
        let res = retry::retry(policy, shutdown, |attempt| {
            trace!("delivering {} metrics, attempt {}", batch.len(), attempt);
            transport.send(&payload.body, signature).map(|_| attempt)
        });
        match res {
            Ok(attempts) => {
                debug!("delivered {} metrics", batch.len());
                Flush::Delivered(attempts)
            }
            Err(RetryError::Failed { error, attempts }) => {
                error!(
                    "dropping batch of {} metrics after {} attempt(s): {}",
                    batch.len(),
                    attempts,
                    error
                );
                Flush::Dropped
            }
            Err(RetryError::Cancelled) => {
                info!("shutdown during delivery, {} metrics unsent", batch.len());
                Flush::Cancelled
            }
        }
    }

    /// Run the delivery loop on the calling thread until shut down or the
    /// sampler's channel closes.
    pub fn run(mut self, shutdown: Shutdown) {
        let ticker = crossbeam_channel::tick(self.interval);
        loop {
            select! {
                recv(shutdown.signal()) -> _ => break,
                recv(ticker) -> _ => {
                    if self.poll(&shutdown) == Flush::Closed {
                        info!("sample channel closed");
                        break;
                    }
                }
            }
        }
        info!("dispatcher shutting down, {} batches unsent", self.inbox.len());
    }
}

//! The collector's HTTP surface.
//!
//! Routes:
//!
//!   - `POST /update/<type>/<id>/<value>` -- single plain-text write
//!   - `POST /update/` -- single JSON write, answers the stored metric
//!   - `POST /updates/` -- JSON array, applied as one batch
//!   - `POST /value/` -- JSON `{id, type}` lookup, answers the stored metric
//!   - `GET /value/<type>/<id>` -- plain-text lookup
//!   - `GET /ping` -- backend liveness
//!   - `GET /` -- plain listing of every stored metric
//!
//! Request bodies may be gzip-compressed. When a key is configured a request
//! carrying a signature must verify against the raw body, and every response
//! is signed.

use crate::codec::{self, SigningKey};
use crate::constants;
use crate::controller::{Controller, ControllerError};
use crate::http::{self, Handler, Request};
use crate::metric::{Kind, Metric, ValidationError, Value, WireMetric};
use crate::store::StoreError;
use percent_encoding::percent_decode_str;
use std::convert::TryFrom;
use std::fmt::Write;
use std::io::Read;
use tiny_http::Method;

const TEXT: &str = "text/plain; charset=utf-8";
const JSON: &str = "application/json";

/// A response, before it is framed for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
    /// Value of the `Content-Type` header.
    pub content_type: &'static str,
}

impl Reply {
    fn text<S: Into<String>>(status: u16, body: S) -> Reply {
        Reply {
            status,
            body: body.into().into_bytes(),
            content_type: TEXT,
        }
    }

    fn json(metric: Metric) -> Reply {
        match serde_json::to_vec(&metric) {
            Ok(body) => Reply {
                status: 200,
                body,
                content_type: JSON,
            },
            Err(e) => Reply::text(500, format!("cannot encode metric: {}", e)),
        }
    }

    /// The body as text, for logging and tests.
    pub fn body_str(&self) -> &str {
        ::std::str::from_utf8(&self.body).unwrap_or("<binary>")
    }
}

enum Failure {
    BadRequest(String),
    NotFound,
    Unavailable(String),
    Internal(String),
}

impl From<ValidationError> for Failure {
    fn from(e: ValidationError) -> Failure {
        Failure::BadRequest(e.to_string())
    }
}

impl From<ControllerError> for Failure {
    fn from(e: ControllerError) -> Failure {
        match *e.store_error() {
            StoreError::NotFound => Failure::NotFound,
            StoreError::Backend(_) => Failure::Unavailable(e.to_string()),
            _ => Failure::Internal(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for Failure {
    fn from(e: serde_json::Error) -> Failure {
        Failure::BadRequest(format!("malformed json: {}", e))
    }
}

impl Failure {
    fn reply(self) -> Reply {
        match self {
            Failure::BadRequest(why) => Reply::text(400, why),
            Failure::NotFound => Reply::text(404, "not found"),
            Failure::Unavailable(why) => {
                warn!("backend unavailable: {}", why);
                Reply::text(503, "backend unavailable")
            }
            Failure::Internal(why) => {
                error!("request failed: {}", why);
                Reply::text(500, "internal error")
            }
        }
    }
}

/// Serves the collector routes over a `Controller`.
pub struct Collector {
    controller: Controller,
    key: Option<SigningKey>,
}

impl Collector {
    /// A collector writing through `controller`.
    pub fn new(controller: Controller) -> Collector {
        Collector {
            controller,
            key: None,
        }
    }

    /// Verify signed requests and sign responses with `key`.
    pub fn key(mut self, key: Option<SigningKey>) -> Collector {
        self.key = key;
        self
    }

    /// Route one request.
    ///
    /// `url` may carry a query string, which is ignored. `body` is the raw
    /// request body; `gzip` says whether it must be decompressed first.
    pub fn dispatch(
        &self,
        method: &Method,
        url: &str,
        gzip: bool,
        signature: Option<&str>,
        body: &[u8],
    ) -> Reply {
        if let (Some(key), Some(tag)) = (self.key.as_ref(), signature) {
            if !key.verify(body, tag) {
                warn!("rejecting request to {} with bad signature", url);
                return Reply::text(400, "signature mismatch");
            }
        }
        let body = if gzip {
            match codec::decompress(body) {
                Ok(b) => b,
                Err(e) => return Reply::text(400, format!("bad gzip body: {}", e)),
            }
        } else {
            body.to_vec()
        };
        let path = url.split('?').next().unwrap_or("");
        let decoded = match path
            .trim_matches('/')
            .split('/')
            .map(|seg| percent_decode_str(seg).decode_utf8().map(|s| s.into_owned()))
            .collect::<Result<Vec<String>, _>>()
        {
            Ok(d) => d,
            Err(e) => return Reply::text(400, format!("bad path encoding: {}", e)),
        };
        let segments: Vec<&str> = decoded.iter().map(|s| s.as_str()).collect();
        let res = match (method, &segments[..]) {
            (&Method::Get, [""]) => self.index(),
            (&Method::Get, ["ping"]) => self.ping(),
            (&Method::Post, ["update"]) => self.update_json(&body),
            (&Method::Post, ["updates"]) => self.updates_json(&body),
            (&Method::Post, ["value"]) => self.value_json(&body),
            (&Method::Post, ["update", kind, id, raw]) => self.update_plain(kind, id, raw),
            (&Method::Get, ["value", kind, id]) => self.value_plain(kind, id),
            _ => Err(Failure::NotFound),
        };
        res.unwrap_or_else(Failure::reply)
    }

    fn index(&self) -> Result<Reply, Failure> {
        let mut out = String::new();
        for m in self.controller.list()? {
            let _ = writeln!(out, "{} {} = {}", m.kind(), m.id, m.value);
        }
        Ok(Reply::text(200, out))
    }

    fn ping(&self) -> Result<Reply, Failure> {
        match self.controller.ping() {
            Ok(()) => Ok(Reply::text(200, "ok")),
            Err(e) => Err(Failure::Internal(e.to_string())),
        }
    }

    fn update_plain(&self, kind: &str, id: &str, raw: &str) -> Result<Reply, Failure> {
        if id.is_empty() {
            return Err(Failure::NotFound);
        }
        let kind: Kind = kind.parse()?;
        let value = Value::parse(kind, raw)?;
        let stored = self.controller.update(Metric::new(id, value))?;
        Ok(Reply::text(200, stored.value.to_string()))
    }

    fn update_json(&self, body: &[u8]) -> Result<Reply, Failure> {
        let wire: WireMetric = serde_json::from_slice(body)?;
        let metric = Metric::try_from(wire)?;
        let stored = self.controller.update(metric)?;
        Ok(Reply::json(stored))
    }

    fn updates_json(&self, body: &[u8]) -> Result<Reply, Failure> {
        let wires: Vec<WireMetric> = serde_json::from_slice(body)?;
        let metrics = wires
            .into_iter()
            .map(Metric::try_from)
            .collect::<Result<Vec<Metric>, ValidationError>>()?;
        let n = metrics.len();
        self.controller.updates(metrics)?;
        trace!("applied batch of {} metrics", n);
        Ok(Reply::text(200, "ok"))
    }

    fn value_json(&self, body: &[u8]) -> Result<Reply, Failure> {
        let wire: WireMetric = serde_json::from_slice(body)?;
        let kind = wire.parsed_kind()?;
        let stored = self.controller.value(&wire.id, kind)?;
        Ok(Reply::json(stored))
    }

    fn value_plain(&self, kind: &str, id: &str) -> Result<Reply, Failure> {
        let kind: Kind = kind.parse()?;
        let stored = self.controller.value(id, kind)?;
        Ok(Reply::text(200, stored.value.to_string()))
    }
}

fn header_value(request: &Request, field: &'static str) -> Option<String> {
    request
        .headers()
        .iter()
        .find(|h| h.field.equiv(field))
        .map(|h| h.value.as_str().to_string())
}

impl Handler for Collector {
    fn handle(&self, mut request: Request) {
        let mut body = Vec::new();
        let read = Read::take(request.as_reader(), constants::MAX_BODY_BYTES + 1)
            .read_to_end(&mut body);
        let reply = match read {
            Ok(_) if body.len() as u64 > constants::MAX_BODY_BYTES => {
                Reply::text(413, "request body too large")
            }
            Ok(_) => {
                let gzip = header_value(&request, "Content-Encoding")
                    .map_or(false, |v| v.eq_ignore_ascii_case("gzip"));
                let signature = header_value(&request, constants::SIGNATURE_HEADER);
                self.dispatch(
                    request.method(),
                    request.url(),
                    gzip,
                    signature.as_ref().map(|s| s.as_str()),
                    &body,
                )
            }
            Err(e) => Reply::text(400, format!("cannot read body: {}", e)),
        };
        debug!("{} {} -> {}", request.method(), request.url(), reply.status);

        let mut response = tiny_http::Response::from_data(reply.body.clone()).with_status_code(reply.status);
        if let Some(h) = http::header("Content-Type", reply.content_type) {
            response = response.with_header(h);
        }
        if let Some(ref key) = self.key {
            if let Some(h) = http::header(constants::SIGNATURE_HEADER, &key.sign(&reply.body)) {
                response = response.with_header(h);
            }
        }
        if let Err(e) = request.respond(response) {
            warn!("failed to send response: {}", e);
        }
    }
}

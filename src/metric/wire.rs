//! The JSON wire shape of a metric and its validation.

use super::{Kind, Metric, Value};
use std::convert::TryFrom;
use std::error;
use std::fmt;

/// A metric as it travels between agent and collector, and as it is written
/// into snapshots. Exactly one of `delta` / `value` is meaningful, selected by
/// `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMetric {
    /// Metric id.
    pub id: String,
    /// `gauge` or `counter`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Counter delta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    /// Gauge value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

/// Why a submitted metric was rejected. Validation failures are client
/// errors and are never retried.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// The id was empty.
    EmptyId,
    /// The type was neither `gauge` nor `counter`.
    UnknownKind(String),
    /// A counter arrived without a delta.
    MissingDelta(String),
    /// A gauge arrived without a value.
    MissingValue(String),
    /// A metric carried the payload field of the other kind.
    ConflictingPayload(String),
    /// A plain-text payload did not parse.
    BadPayload(String),
    /// A gauge was NaN or infinite.
    NonFinite(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ValidationError::EmptyId => write!(f, "metric id is empty"),
            ValidationError::UnknownKind(ref k) => write!(f, "unknown metric type '{}'", k),
            ValidationError::MissingDelta(ref id) => {
                write!(f, "counter '{}' has no delta", id)
            }
            ValidationError::MissingValue(ref id) => {
                write!(f, "gauge '{}' has no value", id)
            }
            ValidationError::ConflictingPayload(ref id) => {
                write!(f, "metric '{}' carries both delta and value", id)
            }
            ValidationError::BadPayload(ref raw) => write!(f, "cannot parse value '{}'", raw),
            ValidationError::NonFinite(ref raw) => write!(f, "value '{}' is not finite", raw),
        }
    }
}

impl error::Error for ValidationError {}

impl From<Metric> for WireMetric {
    fn from(metric: Metric) -> WireMetric {
        let kind = metric.kind().as_str().to_string();
        match metric.value {
            Value::Gauge(v) => WireMetric {
                id: metric.id,
                kind,
                delta: None,
                value: Some(v),
            },
            Value::Counter(d) => WireMetric {
                id: metric.id,
                kind,
                delta: Some(d),
                value: None,
            },
        }
    }
}

impl TryFrom<WireMetric> for Metric {
    type Error = ValidationError;

    fn try_from(wire: WireMetric) -> Result<Metric, ValidationError> {
        if wire.id.is_empty() {
            return Err(ValidationError::EmptyId);
        }
        let kind: Kind = wire.kind.parse()?;
        let value = match (kind, wire.delta, wire.value) {
            (Kind::Counter, Some(d), None) => Value::Counter(d),
            (Kind::Gauge, None, Some(v)) if v.is_finite() => Value::Gauge(v),
            (Kind::Gauge, None, Some(v)) => {
                return Err(ValidationError::NonFinite(v.to_string()))
            }
            (_, Some(_), Some(_)) => return Err(ValidationError::ConflictingPayload(wire.id)),
            (Kind::Counter, None, _) => return Err(ValidationError::MissingDelta(wire.id)),
            (Kind::Gauge, _, None) => return Err(ValidationError::MissingValue(wire.id)),
        };
        Ok(Metric { id: wire.id, value })
    }
}

impl WireMetric {
    /// The metric kind, for lookups that carry no payload.
    pub fn parsed_kind(&self) -> Result<Kind, ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::EmptyId);
        }
        self.kind.parse()
    }
}

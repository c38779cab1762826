//! The metric data model.
//!
//! A `Metric` is identified by its id and its `Kind`. The payload is a closed
//! `Value` so a gauge always carries a float and a counter always carries an
//! integer delta; there is no way to build a metric with both or neither.

use std::fmt;
use std::str::FromStr;

mod wire;

pub use self::wire::{ValidationError, WireMetric};

/// The two kinds of metric a collector understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    /// The stored value is the most recently reported scalar.
    Gauge,
    /// The stored value is the running sum of all reported deltas.
    Counter,
}

impl Kind {
    /// The wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match *self {
            Kind::Gauge => "gauge",
            Kind::Counter => "counter",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Kind, ValidationError> {
        match s {
            "gauge" => Ok(Kind::Gauge),
            "counter" => Ok(Kind::Counter),
            other => Err(ValidationError::UnknownKind(other.to_string())),
        }
    }
}

/// The payload of a metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// A gauge reading.
    Gauge(f64),
    /// A counter delta, or accumulated total once stored.
    Counter(i64),
}

impl Value {
    /// The kind this payload belongs to.
    pub fn kind(&self) -> Kind {
        match *self {
            Value::Gauge(_) => Kind::Gauge,
            Value::Counter(_) => Kind::Counter,
        }
    }

    /// Parse a plain-text payload of the given kind.
    ///
    /// Counters must be integers, gauges any finite float.
    pub fn parse(kind: Kind, raw: &str) -> Result<Value, ValidationError> {
        match kind {
            Kind::Counter => raw
                .parse::<i64>()
                .map(Value::Counter)
                .map_err(|_| ValidationError::BadPayload(raw.to_string())),
            Kind::Gauge => match raw.parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(Value::Gauge(v)),
                Ok(_) => Err(ValidationError::NonFinite(raw.to_string())),
                Err(_) => Err(ValidationError::BadPayload(raw.to_string())),
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Value::Gauge(v) => write!(f, "{}", v),
            Value::Counter(d) => write!(f, "{}", d),
        }
    }
}

/// The identity of a metric. A gauge and a counter sharing an id are
/// distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    /// Metric id.
    pub id: String,
    /// Metric kind.
    pub kind: Kind,
}

impl Key {
    /// Build a key from its parts.
    pub fn new<S>(id: S, kind: Kind) -> Key
    where
        S: Into<String>,
    {
        Key {
            id: id.into(),
            kind,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.kind)
    }
}

/// A single metric: an id plus a typed payload.
///
/// Serializes to, and deserializes from, the wire object
/// `{"id", "type", "delta"?, "value"?}`. Deserialization validates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireMetric", try_from = "WireMetric")]
pub struct Metric {
    /// Metric id.
    pub id: String,
    /// Metric payload.
    pub value: Value,
}

impl Metric {
    /// Create a metric from an already-typed payload.
    pub fn new<S>(id: S, value: Value) -> Metric
    where
        S: Into<String>,
    {
        Metric {
            id: id.into(),
            value,
        }
    }

    /// Create a gauge reading.
    pub fn gauge<S>(id: S, value: f64) -> Metric
    where
        S: Into<String>,
    {
        Metric {
            id: id.into(),
            value: Value::Gauge(value),
        }
    }

    /// Create a counter delta.
    pub fn counter<S>(id: S, delta: i64) -> Metric
    where
        S: Into<String>,
    {
        Metric {
            id: id.into(),
            value: Value::Counter(delta),
        }
    }

    /// The kind of this metric, derived from its payload.
    pub fn kind(&self) -> Kind {
        self.value.kind()
    }

    /// The uniqueness key of this metric.
    pub fn key(&self) -> Key {
        Key::new(self.id.clone(), self.kind())
    }

    /// Replace the payload, keeping the id.
    pub fn with_value(mut self, value: Value) -> Metric {
        self.value = value;
        self
    }
}

/// A metric paired with whether its key was already persisted before the
/// batch it belongs to. Stores use the flag to pick insert or update.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRecord {
    /// The fully merged metric to persist.
    pub metric: Metric,
    /// Whether the key already exists in the store.
    pub exists: bool,
}

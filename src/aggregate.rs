//! Merge rules for gauge and counter writes.
//!
//! There is exactly one rule, applied both within a batch and between a batch
//! and the persisted state: counters add, gauges replace. Everything in this
//! module is pure; stores and I/O live elsewhere.

use crate::metric::{BatchRecord, Key, Metric, Value};
use std::collections::HashMap;

/// Merge an incoming payload into the current one.
///
/// Counters saturate rather than wrap. A payload of a different kind replaces
/// the current one; keys carry the kind so callers never hit that case.
pub fn merge(current: Value, incoming: Value) -> Value {
    match (current, incoming) {
        (Value::Counter(old), Value::Counter(delta)) => Value::Counter(old.saturating_add(delta)),
        (_, incoming) => incoming,
    }
}

/// Fold repeated keys within one batch.
///
/// Input is scanned in arrival order. The first occurrence of a key seeds its
/// entry and later occurrences are merged into it, so counters sum and the
/// last gauge wins. The output holds one metric per key, ordered by first
/// appearance.
pub fn fold_batch<I>(metrics: I) -> Vec<Metric>
where
    I: IntoIterator<Item = Metric>,
{
    let mut index: HashMap<Key, usize> = HashMap::new();
    let mut folded: Vec<Metric> = Vec::new();
    for metric in metrics {
        let key = metric.key();
        match index.get(&key) {
            Some(&idx) => {
                let merged = merge(folded[idx].value, metric.value);
                folded[idx].value = merged;
            }
            None => {
                index.insert(key, folded.len());
                folded.push(metric);
            }
        }
    }
    folded
}

/// Fold a batch-folded set of metrics against persisted state.
///
/// `lookup` returns the persisted payload for a metric, `None` when the key is
/// not stored. The result records, per key, the final value to write and
/// whether the key already existed. The first lookup error aborts the plan.
pub fn plan<F, E>(folded: Vec<Metric>, mut lookup: F) -> Result<Vec<BatchRecord>, E>
where
    F: FnMut(&Metric) -> Result<Option<Value>, E>,
{
    let mut records = Vec::with_capacity(folded.len());
    for metric in folded {
        let record = match lookup(&metric)? {
            Some(current) => {
                let value = merge(current, metric.value);
                BatchRecord {
                    metric: metric.with_value(value),
                    exists: true,
                }
            }
            None => BatchRecord {
                metric,
                exists: false,
            },
        };
        records.push(record);
    }
    Ok(records)
}

//! Tally is a push-based metrics pipeline. Lightweight agents sample host and
//! process telemetry on a fixed interval and push it, in batches, to a
//! collector. The collector keeps exactly one current scalar per metric
//! identity: gauges are overwritten by the latest report, counters accumulate
//! every reported delta.
//!
//! The interesting bits live in a handful of modules:
//!
//!  * `aggregate` folds a batch of writes into the values that will be stored.
//!  * `store` persists metrics, atomically per batch, in memory or in SQLite.
//!  * `snapshot` makes the in-memory store durable across restarts.
//!  * `agent` hosts the sampler and dispatcher threads that feed a collector.
//!
//! Everything else -- HTTP, configuration, compression -- is thin plumbing
//! around those.
#![allow(unknown_lints)]
#![deny(trivial_numeric_casts, missing_docs, unstable_features, unused_import_braces)]
extern crate blake3;
extern crate chrono;
extern crate clap;
#[macro_use]
extern crate crossbeam_channel;
extern crate flate2;
extern crate percent_encoding;
extern crate rand;
extern crate reqwest;
extern crate rusqlite;
extern crate serde;
#[cfg_attr(test, macro_use)]
extern crate serde_json;
extern crate sysinfo;
extern crate tiny_http;
extern crate toml;
extern crate url;

#[macro_use]
extern crate log;

#[macro_use]
extern crate serde_derive;

#[cfg(test)]
extern crate quickcheck;

pub mod agent;
pub mod aggregate;
pub mod codec;
pub mod collector;
pub mod config;
pub mod constants;
pub mod controller;
pub mod http;
pub mod metric;
pub mod snapshot;
pub mod store;
pub mod thread;

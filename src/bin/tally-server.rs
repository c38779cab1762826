#![allow(unknown_lints)]

extern crate chan_signal;
extern crate chrono;
extern crate fern;
extern crate tally;

#[macro_use]
extern crate log;

use chrono::Utc;
use std::process;
use std::sync::Arc;
use tally::codec::SigningKey;
use tally::collector::Collector;
use tally::config::{self, ServerArgs};
use tally::controller::Controller;
use tally::http;
use tally::snapshot::{Snapshot, Snapshotter};
use tally::store::{MemStore, MetricStore, SqlStore, SqliteClient, StoreError};
use tally::thread;

fn open_store(args: &ServerArgs) -> Result<Arc<dyn MetricStore>, StoreError> {
    match args.database_dsn {
        Some(ref dsn) => {
            info!("keeping metrics in sqlite database {}", dsn);
            let store = SqlStore::new(SqliteClient::open(dsn)?)?;
            Ok(Arc::new(store))
        }
        None => {
            info!(
                "keeping metrics in memory, snapshot at {}",
                args.file_storage_path.display()
            );
            let snapshot = Snapshot::new(&args.file_storage_path);
            let store = MemStore::with_snapshot(snapshot, args.restore, args.store_interval == 0)?;
            Ok(Arc::new(store))
        }
    }
}

fn main() {
    let args = match config::parse_server_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("tally-server: {}", e);
            process::exit(1);
        }
    };

    let level = match args.verbose {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Warn,
        2 => log::LevelFilter::Info,
        3 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    let signal =
        chan_signal::notify(&[chan_signal::Signal::INT, chan_signal::Signal::TERM]);

    let logging = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}][{}] {}",
                record.module_path().unwrap_or("-"),
                record.line().unwrap_or(0),
                Utc::now().to_rfc3339(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .apply();
    if let Err(e) = logging {
        eprintln!("tally-server: could not set up logging: {}", e);
        process::exit(1);
    }

    info!("tally-server - {}", args.version);

    let store = match open_store(&args) {
        Ok(store) => store,
        Err(e) => {
            error!("could not open metric store: {}", e);
            process::exit(1);
        }
    };

    let snapshotter = match args.database_dsn {
        Some(_) => None,
        None => args.snapshot_interval().map(|interval| {
            let snapshotter = Snapshotter::new(Arc::clone(&store), interval);
            thread::spawn("snapshotter", move |shutdown| snapshotter.run(shutdown))
        }),
    };
    let snapshotter = match snapshotter.transpose() {
        Ok(s) => s,
        Err(e) => {
            error!("could not start snapshotter: {}", e);
            process::exit(1);
        }
    };

    let key = SigningKey::from_secret(args.key.as_ref().map(|k| k.as_str()));
    let collector = Collector::new(Controller::new(Arc::clone(&store))).key(key);
    let server = match http::Server::new(&args.address, collector) {
        Ok(server) => server,
        Err(e) => {
            error!("could not listen on {}: {}", args.address, e);
            process::exit(1);
        }
    };

    let sig = signal.recv();
    info!("received signal {:?}, shutting down", sig);

    server.shutdown();
    if let Some(snapshotter) = snapshotter {
        snapshotter.shutdown();
    }
    info!("tally-server stopped");
}

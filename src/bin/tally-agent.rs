#![allow(unknown_lints)]

extern crate chan_signal;
extern crate chrono;
extern crate crossbeam_channel;
extern crate fern;
extern crate tally;

#[macro_use]
extern crate log;

use chrono::Utc;
use std::process;
use std::time::Duration;
use tally::agent::{Dispatcher, HttpTransport, Sampler, SysProbe};
use tally::codec::SigningKey;
use tally::config;
use tally::thread;

fn main() {
    let args = match config::parse_agent_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("tally-agent: {}", e);
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
        eprintln!("tally-agent: could not set up logging: {}", e);
        process::exit(1);
    }

    info!("tally-agent - {}", args.version);

    let transport = match HttpTransport::new(&args.address) {
        Ok(t) => t,
        Err(e) => {
            error!("could not set up delivery to {}: {}", args.address, e);
            process::exit(1);
        }
    };
    info!("delivering to {}", transport.endpoint());

    let (snd, rcv) = crossbeam_channel::bounded(args.rate_limit);
    let sampler = Sampler::new(
        SysProbe::new(),
        Duration::from_secs(args.poll_interval),
        snd,
    );
    let key = SigningKey::from_secret(args.key.as_ref().map(|k| k.as_str()));
    let dispatcher =
        Dispatcher::new(transport, rcv, Duration::from_secs(args.report_interval)).key(key);

    let sampler = match thread::spawn("sampler", move |shutdown| sampler.run(shutdown)) {
        Ok(handle) => handle,
        Err(e) => {
            error!("could not start sampler: {}", e);
            process::exit(1);
        }
    };
    let dispatcher = match thread::spawn("dispatcher", move |shutdown| dispatcher.run(shutdown)) {
        Ok(handle) => handle,
        Err(e) => {
            error!("could not start dispatcher: {}", e);
            process::exit(1);
        }
    };

    let sig = signal.recv();
    info!("received signal {:?}, shutting down", sig);

    sampler.shutdown();
    dispatcher.shutdown();
    info!("tally-agent stopped");
}

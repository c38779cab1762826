//! Periodic sampling of a `Probe` onto a bounded channel.

use super::probe::Probe;
use super::Batch;
use crate::constants::POLL_COUNT;
use crate::metric::Metric;
use crate::thread::Shutdown;
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// The periodic producer of metric batches.
///
/// Every tick the sampler reads its probe's gauge catalog, bumps its poll
/// counter by one and pushes the whole set as one batch. The outbound channel
/// is bounded; when it is full the sampler blocks, which is the agent's only
/// backpressure. On shutdown the sender is dropped, closing the channel.
pub struct Sampler<P> {
    probe: P,
    interval: Duration,
    polls: Arc<AtomicI64>,
    chan: Sender<Batch>,
}

impl<P> Sampler<P>
where
    P: Probe,
{
    /// A sampler reading `probe` every `interval` into `chan`.
    pub fn new(probe: P, interval: Duration, chan: Sender<Batch>) -> Sampler<P> {
        Sampler {
            probe,
            interval,
            polls: Arc::new(AtomicI64::new(0)),
            chan,
        }
    }

    /// A shared view of how many samples this sampler has taken.
    pub fn polls(&self) -> Arc<AtomicI64> {
        self.polls.clone()
    }

    /// Take one sample.
    ///
    /// The poll counter is reported as a delta of one; the collector's
    /// running sum is the total sample count.
    pub fn sample(&mut self) -> Batch {
        let total = self.polls.fetch_add(1, Ordering::Relaxed) + 1;
        trace!("taking sample {}", total);
        let mut batch: Batch = self
            .probe
            .read()
            .into_iter()
            .map(|(name, v)| Metric::gauge(name, v))
            .collect();
        batch.push(Metric::counter(POLL_COUNT, 1));
        batch
    }

    /// Run the sampling loop on the calling thread until shut down or the
    /// receiving side goes away.
    pub fn run(mut self, shutdown: Shutdown) {
        let ticker = crossbeam_channel::tick(self.interval);
        loop {
            select! {
                recv(shutdown.signal()) -> _ => break,
                recv(ticker) -> _ => {
                    let batch = self.sample();
                    select! {
                        send(self.chan, batch) -> res => {
                            if res.is_err() {
                                info!("sample channel closed by receiver");
                                break;
                            }
                        },
                        recv(shutdown.signal()) -> _ => break,
                    }
                }
            }
        }
        info!(
            "sampler shutting down after {} samples",
            self.polls.load(Ordering::Relaxed)
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::metric::Value;
    use crate::thread;

    struct FixedProbe;

    impl Probe for FixedProbe {
        fn read(&mut self) -> Vec<(&'static str, f64)> {
            vec![("Alloc", 1024.0), ("CPUutilization1", 12.5)]
        }
    }

    #[test]
    fn sample_carries_catalog_and_one_poll() {
        let (snd, _rcv) = crossbeam_channel::bounded(1);
        let mut sampler = Sampler::new(FixedProbe, Duration::from_secs(1), snd);
        let batch = sampler.sample();
        assert_eq!(
            vec![
                Metric::gauge("Alloc", 1024.0),
                Metric::gauge("CPUutilization1", 12.5),
                Metric::counter(POLL_COUNT, 1),
            ],
            batch
        );
        sampler.sample();
        sampler.sample();
        assert_eq!(3, sampler.polls().load(Ordering::Relaxed));
    }

    #[test]
    fn counters_are_per_instance() {
        let (snd, _rcv) = crossbeam_channel::bounded(1);
        let mut a = Sampler::new(FixedProbe, Duration::from_secs(1), snd.clone());
        let b = Sampler::new(FixedProbe, Duration::from_secs(1), snd);
        a.sample();
        assert_eq!(1, a.polls().load(Ordering::Relaxed));
        assert_eq!(0, b.polls().load(Ordering::Relaxed));
    }

    #[test]
    fn full_channel_blocks_until_shutdown_then_closes() {
        let (snd, rcv) = crossbeam_channel::bounded(2);
        let sampler = Sampler::new(FixedProbe, Duration::from_millis(1), snd);
        let polls = sampler.polls();
        let handle = thread::spawn("sampler", move |shutdown| sampler.run(shutdown)).unwrap();

        // Nobody drains: two batches fit, the third sample blocks on send.
        while polls.load(Ordering::Relaxed) < 3 {
            ::std::thread::sleep(Duration::from_millis(1));
        }
        ::std::thread::sleep(Duration::from_millis(20));
        assert_eq!(3, polls.load(Ordering::Relaxed));
        assert_eq!(2, rcv.len());

        handle.shutdown();
        let drained: Vec<Batch> = rcv.iter().collect();
        assert_eq!(2, drained.len());
        for batch in drained {
            let polls: Vec<&Metric> = batch.iter().filter(|m| m.id == POLL_COUNT).collect();
            assert_eq!(1, polls.len());
            assert_eq!(Value::Counter(1), polls[0].value);
        }
    }
}

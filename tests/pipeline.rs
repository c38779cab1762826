mod integration {
    mod pipeline {

        extern crate tally;
        extern crate tempdir;

        use self::tally::agent::{
            DeliveryError, Dispatcher, Flush, HttpTransport, Probe, RetryPolicy, Sampler,
        };
        use self::tally::codec::SigningKey;
        use self::tally::collector::Collector;
        use self::tally::controller::Controller;
        use self::tally::http::{self, Handler, Request};
        use self::tally::metric::{Kind, Metric, Value};
        use self::tally::snapshot::Snapshot;
        use self::tally::store::{MemStore, MetricStore};
        use self::tally::thread;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use std::time::{Duration, Instant};

        fn address(server: &http::Server) -> String {
            server.local_addr().unwrap().to_string()
        }

        fn fast() -> RetryPolicy {
            RetryPolicy {
                attempts: 3,
                delays: vec![Duration::from_millis(5), Duration::from_millis(10)],
            }
        }

        struct ConstProbe;

        impl Probe for ConstProbe {
            fn read(&mut self) -> Vec<(&'static str, f64)> {
                vec![("Alloc", 2048.0), ("RandomValue", 0.5)]
            }
        }

        #[test]
        fn batches_reach_the_collector() {
            let store: Arc<dyn MetricStore> = Arc::new(MemStore::new());
            let controller = Controller::new(store);
            let key = SigningKey::new("integration");
            let collector = Collector::new(controller.clone()).key(Some(key.clone()));
            let server = http::Server::new("127.0.0.1:0", collector).unwrap();

            let transport = HttpTransport::new(&address(&server)).unwrap();
            let (snd, rcv) = crossbeam_channel::bounded(4);
            let mut dispatcher =
                Dispatcher::new(transport, rcv, Duration::from_secs(1)).key(Some(key));
            let (_trigger, shutdown) = thread::signal();

            snd.send(vec![Metric::counter("PollCount", 1), Metric::gauge("Alloc", 1.5)])
                .unwrap();
            snd.send(vec![Metric::counter("PollCount", 1), Metric::gauge("Alloc", 2.5)])
                .unwrap();
            assert_eq!(Flush::Delivered(1), dispatcher.poll(&shutdown));
            assert_eq!(Flush::Delivered(1), dispatcher.poll(&shutdown));
            assert_eq!(Flush::Idle, dispatcher.poll(&shutdown));

            assert_eq!(
                Metric::counter("PollCount", 2),
                controller.value("PollCount", Kind::Counter).unwrap()
            );
            assert_eq!(
                Metric::gauge("Alloc", 2.5),
                controller.value("Alloc", Kind::Gauge).unwrap()
            );
            server.shutdown();
        }

        #[test]
        fn wrong_key_is_rejected_without_retry() {
            let controller = Controller::new(Arc::new(MemStore::new()));
            let collector =
                Collector::new(controller.clone()).key(Some(SigningKey::new("collector")));
            let server = http::Server::new("127.0.0.1:0", collector).unwrap();

            let transport = HttpTransport::new(&address(&server)).unwrap();
            let (snd, rcv) = crossbeam_channel::bounded(1);
            let mut dispatcher = Dispatcher::new(transport, rcv, Duration::from_secs(1))
                .key(Some(SigningKey::new("agent")))
                .policy(fast());
            let (_trigger, shutdown) = thread::signal();

            snd.send(vec![Metric::gauge("Alloc", 1.0)]).unwrap();
            assert_eq!(Flush::Dropped, dispatcher.poll(&shutdown));
            assert!(controller.value("Alloc", Kind::Gauge).unwrap_err().is_not_found());
            server.shutdown();
        }

        struct Flaky {
            calls: Arc<AtomicUsize>,
            statuses: Vec<u16>,
        }

        impl Handler for Flaky {
            fn handle(&self, request: Request) {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                let status = self.statuses.get(n).cloned().unwrap_or(200);
                request.respond(http::text(status, "")).unwrap();
            }
        }

        #[test]
        fn unavailable_collector_is_retried() {
            let calls = Arc::new(AtomicUsize::new(0));
            let flaky = Flaky {
                calls: Arc::clone(&calls),
                statuses: vec![503, 503],
            };
            let server = http::Server::new("127.0.0.1:0", flaky).unwrap();

            let transport = HttpTransport::new(&address(&server)).unwrap();
            let (snd, rcv) = crossbeam_channel::bounded(1);
            let mut dispatcher =
                Dispatcher::new(transport, rcv, Duration::from_secs(1)).policy(fast());
            let (_trigger, shutdown) = thread::signal();

            snd.send(vec![Metric::gauge("Alloc", 1.0)]).unwrap();
            assert_eq!(Flush::Delivered(3), dispatcher.poll(&shutdown));
            assert_eq!(3, calls.load(Ordering::SeqCst));
            server.shutdown();
        }

        #[test]
        fn server_error_is_not_retried() {
            let calls = Arc::new(AtomicUsize::new(0));
            let flaky = Flaky {
                calls: Arc::clone(&calls),
                statuses: vec![500],
            };
            let server = http::Server::new("127.0.0.1:0", flaky).unwrap();

            let mut transport = HttpTransport::new(&address(&server)).unwrap();
            use self::tally::agent::Transport;
            assert_eq!(Err(DeliveryError::Status(500)), transport.send(b"", None));
            assert_eq!(1, calls.load(Ordering::SeqCst));
            server.shutdown();
        }

        #[test]
        fn agent_threads_feed_a_collector() {
            let controller = Controller::new(Arc::new(MemStore::new()));
            let server =
                http::Server::new("127.0.0.1:0", Collector::new(controller.clone())).unwrap();

            let (snd, rcv) = crossbeam_channel::bounded(1);
            let sampler = Sampler::new(ConstProbe, Duration::from_millis(5), snd);
            let transport = HttpTransport::new(&address(&server)).unwrap();
            let dispatcher = Dispatcher::new(transport, rcv, Duration::from_millis(5));
            let sampler = thread::spawn("sampler", move |s| sampler.run(s)).unwrap();
            let dispatcher = thread::spawn("dispatcher", move |s| dispatcher.run(s)).unwrap();

            let deadline = Instant::now() + Duration::from_secs(10);
            loop {
                match controller.value("PollCount", Kind::Counter) {
                    Ok(Metric {
                        value: Value::Counter(n),
                        ..
                    }) if n >= 3 => break,
                    _ => {}
                }
                assert!(Instant::now() < deadline, "agent never delivered");
                ::std::thread::sleep(Duration::from_millis(5));
            }
            sampler.shutdown();
            dispatcher.shutdown();
            server.shutdown();

            assert_eq!(
                Metric::gauge("Alloc", 2048.0),
                controller.value("Alloc", Kind::Gauge).unwrap()
            );
        }

        #[test]
        fn snapshot_survives_restart() {
            let dir = tempdir::TempDir::new("tally-restart").unwrap();
            let path = dir.path().join("metrics.json");

            {
                let store = MemStore::with_snapshot(Snapshot::new(&path), true, true).unwrap();
                let controller = Controller::new(Arc::new(store));
                controller.update(Metric::counter("hits", 4)).unwrap();
                controller
                    .updates(vec![Metric::counter("hits", 1), Metric::gauge("temp", 21.5)])
                    .unwrap();
            }

            let store = MemStore::with_snapshot(Snapshot::new(&path), true, false).unwrap();
            let controller = Controller::new(Arc::new(store));
            assert_eq!(
                Metric::counter("hits", 5),
                controller.value("hits", Kind::Counter).unwrap()
            );
            assert_eq!(
                Metric::gauge("temp", 21.5),
                controller.value("temp", Kind::Gauge).unwrap()
            );

            let fresh = MemStore::with_snapshot(Snapshot::new(&path), false, false).unwrap();
            assert!(fresh.is_empty());
        }
    }
}

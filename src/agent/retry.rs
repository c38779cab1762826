//! Bounded retry with a fixed delay schedule.

use crate::thread::Shutdown;
use std::fmt;
use std::time::Duration;

/// Failures that may clear up on their own.
pub trait Retryable {
    /// Whether another attempt could succeed.
    fn is_transient(&self) -> bool;
}

/// How many times to try and how long to wait between tries.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first included. Zero is treated as one.
    pub attempts: u32,
    /// Delay before the second, third, ... attempt. The last entry repeats
    /// when there are more attempts than delays.
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(5),
            ],
        }
    }
}

impl RetryPolicy {
    /// The wait after failed attempt number `attempt`, counting from one.
    pub fn delay(&self, attempt: u32) -> Duration {
        if self.delays.is_empty() {
            return Duration::from_secs(0);
        }
        let idx = (attempt.max(1) - 1) as usize;
        self.delays[idx.min(self.delays.len() - 1)]
    }
}

/// Why a retried operation gave up.
#[derive(Debug, PartialEq)]
pub enum RetryError<E> {
    /// The last error seen, after `attempts` tries.
    Failed {
        /// The final error.
        error: E,
        /// How many attempts were made.
        attempts: u32,
    },
    /// Shutdown was requested before the operation succeeded.
    Cancelled,
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            RetryError::Failed {
                ref error,
                attempts,
            } => write!(f, "gave up after {} attempt(s): {}", attempts, error),
            RetryError::Cancelled => f.write_str("cancelled by shutdown"),
        }
    }
}

/// Run `op` under `policy`, sleeping with `wait` between attempts.
///
/// `op` receives the attempt number, counting from one. `wait` returns true
/// to abandon the retry loop early. Non-transient errors are returned at once.
pub fn retry_with<T, E, F, W>(policy: &RetryPolicy, mut op: F, mut wait: W) -> Result<T, RetryError<E>>
where
    E: Retryable + fmt::Display,
    F: FnMut(u32) -> Result<T, E>,
    W: FnMut(Duration) -> bool,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(t) => return Ok(t),
            Err(error) => {
                if !error.is_transient() || attempt >= attempts {
                    return Err(RetryError::Failed { error, attempts: attempt });
                }
                let delay = policy.delay(attempt);
                debug!(
                    "attempt {} of {} failed: {}; retrying in {:?}",
                    attempt, attempts, error, delay
                );
                if wait(delay) {
                    return Err(RetryError::Cancelled);
                }
                attempt += 1;
            }
        }
    }
}

/// Run `op` under `policy`, abandoning on `shutdown`.
///
/// Shutdown is checked before every attempt and wakes any pending delay.
pub fn retry<T, E, F>(policy: &RetryPolicy, shutdown: &Shutdown, mut op: F) -> Result<T, RetryError<E>>
where
    E: Retryable + fmt::Display,
    F: FnMut(u32) -> Result<T, E>,
{
    if shutdown.is_triggered() {
        return Err(RetryError::Cancelled);
    }
    retry_with(policy, |n| op(n), |delay| shutdown.wait(delay) || shutdown.is_triggered())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::thread;
    use std::time::Instant;

    #[derive(Debug, PartialEq)]
    struct Status(u16);

    impl Retryable for Status {
        fn is_transient(&self) -> bool {
            match self.0 {
                502 | 503 | 504 => true,
                _ => false,
            }
        }
    }

    impl fmt::Display for Status {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "status {}", self.0)
        }
    }

    #[test]
    fn default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(3, policy.attempts);
        assert_eq!(Duration::from_secs(1), policy.delay(1));
        assert_eq!(Duration::from_secs(3), policy.delay(2));
        assert_eq!(Duration::from_secs(5), policy.delay(3));
        assert_eq!(Duration::from_secs(5), policy.delay(9));
    }

    #[test]
    fn transient_failures_then_success() {
        let mut responses = vec![Ok(()), Err(Status(503)), Err(Status(503))];
        let mut waits = Vec::new();
        let mut seen = Vec::new();
        let res = retry_with(
            &RetryPolicy::default(),
            |n| {
                seen.push(n);
                responses.pop().unwrap()
            },
            |d| {
                waits.push(d);
                false
            },
        );
        assert_eq!(Ok(()), res);
        assert_eq!(vec![1, 2, 3], seen);
        assert_eq!(vec![Duration::from_secs(1), Duration::from_secs(3)], waits);
    }

    #[test]
    fn gives_up_after_attempts() {
        let mut calls = 0;
        let res: Result<(), _> = retry_with(
            &RetryPolicy::default(),
            |_| {
                calls += 1;
                Err(Status(502))
            },
            |_| false,
        );
        assert_eq!(
            Err(RetryError::Failed {
                error: Status(502),
                attempts: 3
            }),
            res
        );
        assert_eq!(3, calls);
    }

    #[test]
    fn permanent_failure_is_not_retried() {
        let mut calls = 0;
        let res: Result<(), _> = retry_with(
            &RetryPolicy::default(),
            |_| {
                calls += 1;
                Err(Status(400))
            },
            |_| panic!("must not wait"),
        );
        assert_eq!(
            Err(RetryError::Failed {
                error: Status(400),
                attempts: 1
            }),
            res
        );
        assert_eq!(1, calls);
    }

    #[test]
    fn shutdown_cancels_pending_delay() {
        let policy = RetryPolicy {
            attempts: 3,
            delays: vec![Duration::from_secs(60)],
        };
        let (done_snd, done_rcv) = crossbeam_channel::bounded(1);
        let handle = thread::spawn("retrier", move |shutdown| {
            let res: Result<(), RetryError<Status>> = retry(&policy, &shutdown, |_| Err(Status(503)));
            done_snd.send(res).unwrap();
        })
        .unwrap();
        let start = Instant::now();
        ::std::thread::sleep(Duration::from_millis(20));
        handle.shutdown();
        assert_eq!(Err(RetryError::Cancelled), done_rcv.recv().unwrap());
        assert!(start.elapsed() < Duration::from_secs(30));
    }

    #[test]
    fn already_shut_down_never_attempts() {
        let (trigger, shutdown) = thread::signal();
        trigger.fire();
        let res: Result<(), RetryError<Status>> =
            retry(&RetryPolicy::default(), &shutdown, |_| panic!("must not run"));
        assert_eq!(Err(RetryError::Cancelled), res);
    }
}

use std::fmt::Display;
use std::thread;
use std::time::Duration;

/// Exponential backoff schedule.
///
/// Attempt `n` (zero based, counting retries only) waits `initial_delay * 2^n`, capped at
/// `max_delay`. The sequence never decreases, and at most `max_retries` waits happen, so
/// the total time spent sleeping is bounded by `max_retries * max_delay`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Backoff {
        Backoff {
            max_retries: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl Backoff {
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Backoff {
        Backoff {
            max_retries,
            initial_delay,
            max_delay: max_delay.max(initial_delay),
        }
    }

    /// Schedule without sleeping, for tests.
    pub fn immediate(max_retries: u32) -> Backoff {
        Backoff::new(max_retries, Duration::ZERO, Duration::ZERO)
    }

    pub fn delay(&self, retry: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(retry);
        self.initial_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }

    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(move |retry| self.delay(retry))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a transient error.
    Exhausted { attempts: u32, last: E },
    /// The operation failed with an error the predicate does not consider transient.
    Fatal(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Fatal(err) => err,
        }
    }
}

/// Runs `op` until it succeeds, fails with a non-transient error, or the backoff schedule
/// runs out of retries.
pub fn retry<T, E, F, P>(
    backoff: &Backoff,
    what: &str,
    is_transient: P,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Result<T, E>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if !is_transient(&err) => return Err(RetryError::Fatal(err)),
            Err(err) => {
                if attempt >= backoff.max_retries {
                    log::warn!("{} failed after {} attempts: {}", what, attempt + 1, err);
                    return Err(RetryError::Exhausted {
                        attempts: attempt + 1,
                        last: err,
                    });
                }
                let delay = backoff.delay(attempt);
                log::warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    what,
                    attempt + 1,
                    backoff.max_attempts(),
                    delay,
                    err
                );
                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_delays_grow_and_cap() {
        let backoff = Backoff::new(6, Duration::from_millis(100), Duration::from_millis(1000));
        let delays = backoff.delays().collect::<Vec<_>>();
        assert_eq!(
            delays,
            vec![100, 200, 400, 800, 1000, 1000]
                .into_iter()
                .map(Duration::from_millis)
                .collect::<Vec<_>>()
        );
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_delay_saturates() {
        let backoff = Backoff::new(64, Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(backoff.delay(63), Duration::from_secs(30));
    }

    #[test]
    fn test_retry_succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let result = retry(&Backoff::immediate(10), "op", |_: &String| true, || {
            calls.set(calls.get() + 1);
            if calls.get() < 4 {
                Err("locked".to_string())
            } else {
                Ok(calls.get())
            }
        });
        assert_eq!(result.ok(), Some(4));
    }

    #[test]
    fn test_retry_is_bounded() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retry(&Backoff::immediate(10), "op", |_: &String| true, || {
            calls.set(calls.get() + 1);
            Err("io error".to_string())
        });
        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 11);
                assert_eq!(last, "io error");
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(calls.get(), 11);
    }

    #[test]
    fn test_fatal_error_is_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retry(
            &Backoff::immediate(10),
            "op",
            |err: &String| err.starts_with("IO"),
            || {
                calls.set(calls.get() + 1);
                Err("Catalog Error".to_string())
            },
        );
        assert!(matches!(result, Err(RetryError::Fatal(_))));
        assert_eq!(calls.get(), 1);
    }
}

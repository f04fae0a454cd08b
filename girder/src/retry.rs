//  Copyright 2023 Girder Contributors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

//! Policies for retrying an operation safely.
//!
//! A policy is iterated over; each item is the time remaining in the
//! overall budget (or `None` when unbounded), suitable for use as the
//! timeout of the attempted operation:
//!
//! ```no_run
//! use girder::retry::RetryPolicy;
//! # fn attempt(_: Option<std::time::Duration>) -> Result<(), ()> { Ok(()) }
//!
//! let mut succeeded = false;
//! for time_remaining in RetryPolicy::new().attempts(3) {
//!     if attempt(time_remaining).is_ok() {
//!         succeeded = true;
//!         break;
//!     }
//! }
//! ```
use std::thread;
use std::time::{Duration, Instant};

/// A policy constraining how often and for how long an operation is
/// retried.
///
/// An unconstrained policy retries immediately, forever. Constraints
/// compose: a policy may cap the number of attempts, impose a total time
/// budget, and sleep exponentially longer between attempts
/// (`base * 2^(n-1)` before attempt `n`, capped by the remaining budget).
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    attempts: Option<usize>,
    budget: Option<Duration>,
    backoff: Option<Duration>,
}

impl RetryPolicy {
    /// Creates an unconstrained policy.
    pub fn new() -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Caps the total number of attempts.
    pub fn attempts(mut self, attempts: usize) -> RetryPolicy {
        self.attempts = Some(attempts);
        self
    }

    /// Caps the total time spent, including between-attempt sleeps.
    pub fn budget(mut self, budget: Duration) -> RetryPolicy {
        self.budget = Some(budget);
        self
    }

    /// Sleeps exponentially longer between attempts, starting from
    /// `base`.
    pub fn backoff(mut self, base: Duration) -> RetryPolicy {
        self.backoff = Some(base);
        self
    }
}

impl IntoIterator for RetryPolicy {
    type Item = Option<Duration>;
    type IntoIter = Attempts;

    fn into_iter(self) -> Attempts {
        Attempts {
            policy: self,
            attempt: 0,
            deadline: None,
        }
    }
}

/// The iterator over a [`RetryPolicy`]'s attempts.
pub struct Attempts {
    policy: RetryPolicy,
    attempt: usize,
    deadline: Option<Instant>,
}

impl Iterator for Attempts {
    type Item = Option<Duration>;

    fn next(&mut self) -> Option<Option<Duration>> {
        if let Some(max) = self.policy.attempts {
            if self.attempt >= max {
                return None;
            }
        }

        if self.attempt == 0 {
            self.attempt = 1;
            self.deadline = self.policy.budget.map(|budget| Instant::now() + budget);
            return Some(self.policy.budget);
        }

        let mut remaining = match self.deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return None;
                }
                Some(deadline - now)
            }
            None => None,
        };

        if let Some(base) = self.policy.backoff {
            let factor = 1u32 << (self.attempt - 1).min(20);
            let mut delay = base.saturating_mul(factor);
            if let Some(left) = remaining {
                delay = delay.min(left);
                remaining = Some(left - delay);
            }
            thread::sleep(delay);
        }

        self.attempt += 1;
        Some(remaining)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn attempts_are_capped() {
        let count = RetryPolicy::new().attempts(3).into_iter().count();
        assert_eq!(count, 3);
    }

    #[test]
    fn unbounded_policy_yields_no_budget() {
        let mut attempts = RetryPolicy::new().attempts(2).into_iter();
        assert_eq!(attempts.next(), Some(None));
        assert_eq!(attempts.next(), Some(None));
        assert_eq!(attempts.next(), None);
    }

    #[test]
    fn budget_stops_iteration() {
        let started = Instant::now();
        let mut total = 0;
        for time_remaining in RetryPolicy::new()
            .budget(Duration::from_millis(30))
            .backoff(Duration::from_millis(10))
        {
            if let Some(remaining) = time_remaining {
                assert!(remaining <= Duration::from_millis(30));
            }
            total += 1;
            assert!(total < 20, "policy failed to terminate");
        }
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn backoff_sleeps_between_attempts() {
        let started = Instant::now();
        let count = RetryPolicy::new()
            .attempts(3)
            .backoff(Duration::from_millis(10))
            .into_iter()
            .count();
        assert_eq!(count, 3);
        // sleeps of 10ms and 20ms separate the three attempts
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}

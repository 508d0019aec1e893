//! Bounded retry bookkeeping shared by every probe and page fetch
//!
//! Callers drive the loop themselves so that attempts can borrow `&mut self`
//! across awaits:
//!
//! ```ignore
//! let mut retry = policy.start("no response");
//! while let Some(attempt) = retry.next_attempt() {
//!     match fetch().await {
//!         Ok(v) => return Ok(v),
//!         Err(e) => retry.record(e.to_string()),
//!     }
//! }
//! let last_error = retry.into_last_error();
//! ```

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Begin a retry loop; `initial` is reported if no attempt records an error
    pub fn start(&self, initial: impl Into<String>) -> Retry {
        Retry {
            max_attempts: self.max_attempts,
            attempt: 0,
            last_error: initial.into(),
        }
    }
}

/// State of one in-progress retry loop
#[derive(Debug)]
pub struct Retry {
    max_attempts: u32,
    attempt: u32,
    last_error: String,
}

impl Retry {
    /// The next 1-based attempt number, or `None` once the budget is spent
    pub fn next_attempt(&mut self) -> Option<u32> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some(self.attempt)
    }

    /// Remember the failure of the current attempt
    pub fn record(&mut self, error: impl Into<String>) {
        let error = error.into();
        tracing::debug!(
            "Attempt {}/{} failed: {}",
            self.attempt,
            self.max_attempts,
            error
        );
        self.last_error = error;
    }

    pub fn into_last_error(self) -> String {
        self.last_error
    }
}

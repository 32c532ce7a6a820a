//! Ping token generation.
//!
//! Every keepalive Ping carries a token the host echoes back in its Pong, so
//! the keepalive loop can tell which probe an answer belongs to.  Token `0` is
//! reserved: it is what an empty Ping/Pong payload decodes to, so a counter
//! never hands it out.

use std::sync::atomic::{AtomicU64, Ordering};

/// A lock-free source of non-zero, increasing ping tokens.
///
/// # Examples
///
/// ```rust
/// use rembraille_core::protocol::TokenCounter;
///
/// let tokens = TokenCounter::new();
/// assert_eq!(tokens.next(), 1);
/// assert_eq!(tokens.next(), 2);
/// ```
#[derive(Debug)]
pub struct TokenCounter {
    inner: AtomicU64,
}

impl TokenCounter {
    pub fn new() -> Self {
        Self {
            inner: AtomicU64::new(1),
        }
    }

    /// Returns the next token; wraps from `u64::MAX` to 1, skipping 0.
    pub fn next(&self) -> u64 {
        loop {
            // Relaxed: tokens only need uniqueness, not cross-thread ordering.
            let token = self.inner.fetch_add(1, Ordering::Relaxed);
            if token != 0 {
                return token;
            }
        }
    }

    /// The token the next call to [`next`](Self::next) will return, for logging.
    pub fn peek(&self) -> u64 {
        self.inner.load(Ordering::Relaxed).max(1)
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

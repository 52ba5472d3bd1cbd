use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::error::{invalid, Result};

static NEXT_COUNTDOWN_ID: AtomicU64 = AtomicU64::new(1);

/// Completion barrier seeded with the exact number of children a parent
/// waits for.
///
/// Every child receives one [`CompletionToken`] and hands it back exactly
/// once; the token is consumed by [`Countdown::complete`], so a child cannot
/// report twice.
#[derive(Debug)]
pub struct Countdown {
    id: u64,
    remaining: AtomicUsize,
    unissued: AtomicUsize,
}

/// Proof that one child of a [`Countdown`] has not reported yet.
#[derive(Debug)]
#[must_use = "a dropped token keeps its countdown from reaching zero"]
pub struct CompletionToken {
    countdown: u64,
}

impl Countdown {
    pub fn new(count: usize) -> Self {
        Countdown {
            id: NEXT_COUNTDOWN_ID.fetch_add(1, Ordering::Relaxed),
            remaining: AtomicUsize::new(count),
            unissued: AtomicUsize::new(count),
        }
    }

    /// Hands out the next token, `None` once every child has one.
    pub fn issue(&self) -> Option<CompletionToken> {
        self.unissued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .ok()
            .map(|_| CompletionToken { countdown: self.id })
    }

    /// Reports one child complete. Returns true for the report that brings
    /// the countdown to zero.
    pub fn complete(&self, token: CompletionToken) -> Result<bool> {
        if token.countdown != self.id {
            return Err(invalid!(
                "completion token of countdown {} reported to countdown {}",
                token.countdown,
                self.id
            ));
        }

        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map_err(|_| invalid!("countdown {} completed more often than seeded", self.id))?;

        Ok(previous == 1)
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reaches_zero_once() {
        let countdown = Countdown::new(3);
        let tokens: Vec<CompletionToken> = (0..3).map(|_| countdown.issue().unwrap()).collect();
        assert!(countdown.issue().is_none());

        let finished: Vec<bool> = tokens
            .into_iter()
            .map(|token| countdown.complete(token).unwrap())
            .collect();
        assert_eq!(finished, vec![false, false, true]);
        assert!(countdown.is_complete());
    }

    #[test]
    fn test_empty_countdown_is_complete() {
        let countdown = Countdown::new(0);
        assert!(countdown.is_complete());
        assert!(countdown.issue().is_none());
    }

    #[test]
    fn test_foreign_token_is_rejected() {
        let first = Countdown::new(1);
        let second = Countdown::new(1);
        let token = first.issue().unwrap();
        assert!(second.complete(token).is_err());
        assert_eq!(second.remaining(), 1);
    }
}

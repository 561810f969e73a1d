//! Forward/backward/update ordering, enforced in one place.
//!
//! A layer moves through three phases:
//!
//! ```text
//! Idle --forward--> Forwarded --backward--> Backpropagated --update--> Forwarded
//!   ^                                                                     |
//!   +------------------------------ reset --------------------------------+
//! ```
//!
//! `forward` is accepted from any phase and replaces whatever was cached.
//! Gradients are consumed by exactly one update.

use crate::error::{LayerError, LayerResult};
use log::warn;

/// Observable phase of a layer's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerPhase {
    /// Nothing cached.
    Idle,
    /// A forward pass is cached, no gradients are pending.
    ForwardDone,
    /// Gradients from the last backward pass are waiting for an update.
    BackwardDone,
}

/// Cached forward state `C` and pending gradients `G`.
#[derive(Debug)]
pub(crate) enum Lifecycle<C, G> {
    Idle,
    Forwarded(C),
    Backpropagated(C, G),
}

impl<C, G> Default for Lifecycle<C, G> {
    fn default() -> Self {
        Self::Idle
    }
}

impl<C, G> Lifecycle<C, G> {
    /// Stores a fresh forward cache, dropping any pending gradients.
    pub(crate) fn forwarded(&mut self, cache: C) {
        *self = Self::Forwarded(cache);
    }

    /// The cache of the last forward pass.
    pub(crate) fn cache(&self, layer: &'static str) -> LayerResult<&C> {
        match self {
            Self::Idle => {
                warn!("{layer}: backward called before forward");
                Err(LayerError::State("backward called before forward"))
            }
            Self::Forwarded(cache) | Self::Backpropagated(cache, _) => Ok(cache),
        }
    }

    /// Records gradients from a backward pass. A second backward replaces the
    /// first one's gradients.
    pub(crate) fn store_gradients(&mut self, layer: &'static str, gradients: G) -> LayerResult<()> {
        match core::mem::take(self) {
            Self::Idle => {
                warn!("{layer}: gradients stored without a forward pass");
                Err(LayerError::State("backward called before forward"))
            }
            Self::Forwarded(cache) | Self::Backpropagated(cache, _) => {
                *self = Self::Backpropagated(cache, gradients);
                Ok(())
            }
        }
    }

    /// Hands the pending gradients to an update, keeping the forward cache.
    pub(crate) fn take_gradients(&mut self, layer: &'static str) -> LayerResult<G> {
        match core::mem::take(self) {
            Self::Backpropagated(cache, gradients) => {
                *self = Self::Forwarded(cache);
                Ok(gradients)
            }
            other => {
                *self = other;
                warn!("{layer}: update_parameters called before backward");
                Err(LayerError::State("update_parameters called before backward"))
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::Idle;
    }

    pub(crate) const fn phase(&self) -> LayerPhase {
        match self {
            Self::Idle => LayerPhase::Idle,
            Self::Forwarded(_) => LayerPhase::ForwardDone,
            Self::Backpropagated(..) => LayerPhase::BackwardDone,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Tracked = Lifecycle<u8, u16>;

    #[test]
    fn test_backward_needs_forward() {
        let tracked = Tracked::default();
        assert_eq!(tracked.cache("tracked"), Err(LayerError::State("backward called before forward")));
    }

    #[test]
    fn test_gradients_are_consumed_once() {
        let mut tracked = Tracked::default();
        tracked.forwarded(1);
        tracked.store_gradients("tracked", 7).unwrap();
        assert_eq!(tracked.phase(), LayerPhase::BackwardDone);
        assert_eq!(tracked.take_gradients("tracked").unwrap(), 7);
        assert_eq!(tracked.phase(), LayerPhase::ForwardDone);
        assert!(matches!(tracked.take_gradients("tracked"), Err(LayerError::State(_))));
        // the forward cache survives a failed update
        assert_eq!(*tracked.cache("tracked").unwrap(), 1);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut tracked = Tracked::default();
        tracked.forwarded(3);
        tracked.reset();
        tracked.reset();
        assert_eq!(tracked.phase(), LayerPhase::Idle);
        assert!(tracked.cache("tracked").is_err());
    }

    #[test]
    fn test_forward_drops_pending_gradients() {
        let mut tracked = Tracked::default();
        tracked.forwarded(1);
        tracked.store_gradients("tracked", 2).unwrap();
        tracked.forwarded(5);
        assert!(tracked.take_gradients("tracked").is_err());
    }
}

//! Runtime-configurable tuning parameters for the engine.
//!
//! All values have defaults suitable for the host-threaded device runtime.
//! Override via environment variables (prefixed `PEERLINK_`) or by
//! constructing a custom `LinkConfig`.

use crate::error::{LinkError, Result};

/// Upper bound on the register block so the copy loop can keep its block in
/// a fixed-size local array.
pub const MAX_BLOCK_WORDS: usize = 32;

/// Tuning parameters for group execution and descriptor buffering.
///
/// `group_width` and `block_words` are the initialization-time counterparts
/// of what a statically specialized kernel would bake in as template
/// parameters; pick them per target.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Lanes per execution group. Minimum 2: one lane publishes receive
    /// readiness, one discovers the send target.
    pub group_width: usize,

    /// Wide (64-bit) words each lane moves per copy iteration. Must be even
    /// (the copy loop processes word pairs) and at most [`MAX_BLOCK_WORDS`].
    pub block_words: usize,

    /// Initial per-device descriptor buffer capacity, in descriptors.
    pub initial_work_items: usize,

    /// Opt-in handshake watchdog: abort a launch after this many failed
    /// polls of one exchange cell. `None` (the default) preserves the
    /// engine's contract that a missing counterpart descriptor hangs.
    pub spin_limit: Option<u64>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            group_width: 8,
            block_words: 16,
            initial_work_items: 8,
            spin_limit: None,
        }
    }
}

impl LinkConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `PEERLINK_GROUP_WIDTH`
    /// - `PEERLINK_BLOCK_WORDS`
    /// - `PEERLINK_INITIAL_WORK_ITEMS`
    /// - `PEERLINK_SPIN_LIMIT`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("PEERLINK_GROUP_WIDTH") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.group_width = n;
            }
        }
        if let Ok(v) = std::env::var("PEERLINK_BLOCK_WORDS") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.block_words = n;
            }
        }
        if let Ok(v) = std::env::var("PEERLINK_INITIAL_WORK_ITEMS") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.initial_work_items = n;
            }
        }
        if let Ok(v) = std::env::var("PEERLINK_SPIN_LIMIT") {
            if let Ok(n) = v.parse::<u64>() {
                cfg.spin_limit = Some(n);
            }
        }

        cfg
    }

    /// Check the invariants the copy loop and handshake rely on.
    pub fn validate(&self) -> Result<()> {
        if self.group_width < 2 {
            return Err(LinkError::config(format!(
                "group_width {} is below the minimum of 2",
                self.group_width
            )));
        }
        if self.block_words < 2 || self.block_words % 2 != 0 {
            return Err(LinkError::config(format!(
                "block_words {} must be even and at least 2",
                self.block_words
            )));
        }
        if self.block_words > MAX_BLOCK_WORDS {
            return Err(LinkError::config(format!(
                "block_words {} exceeds the maximum of {MAX_BLOCK_WORDS}",
                self.block_words
            )));
        }
        if self.initial_work_items == 0 {
            return Err(LinkError::config("initial_work_items must be nonzero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        LinkConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_narrow_group() {
        let cfg = LinkConfig {
            group_width: 1,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_odd_block() {
        let cfg = LinkConfig {
            block_words: 7,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_oversized_block() {
        let cfg = LinkConfig {
            block_words: MAX_BLOCK_WORDS + 2,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_work_items() {
        let cfg = LinkConfig {
            initial_work_items: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}

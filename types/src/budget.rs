//! Request-scoped budget for a single selection call.

use serde::{Deserialize, Serialize};

/// Token ceiling and pinning parameters for one selection.
///
/// Pin counts larger than the log are not errors; they clamp so the whole log
/// is pinned. A zero budget is valid and selects nothing unpinned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Budget {
    pub max_tokens: u32,
    /// Subtracted from `max_tokens` before selection.
    pub reserve_for_output: u32,
    pub pin_first_n: usize,
    pub pin_last_n: usize,
    /// Pin a leading system item even when `pin_first_n` is zero.
    pub pin_leading_system: bool,
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            max_tokens: Self::DEFAULT_MAX_TOKENS,
            reserve_for_output: 0,
            pin_first_n: 0,
            pin_last_n: 0,
            pin_leading_system: true,
        }
    }
}

impl Budget {
    pub const DEFAULT_MAX_TOKENS: u32 = 100_000;

    #[must_use]
    pub const fn new(max_tokens: u32) -> Self {
        Self {
            max_tokens,
            reserve_for_output: 0,
            pin_first_n: 0,
            pin_last_n: 0,
            pin_leading_system: true,
        }
    }

    #[must_use]
    pub const fn with_reserve(mut self, reserve_for_output: u32) -> Self {
        self.reserve_for_output = reserve_for_output;
        self
    }

    #[must_use]
    pub const fn with_pin_first(mut self, n: usize) -> Self {
        self.pin_first_n = n;
        self
    }

    #[must_use]
    pub const fn with_pin_last(mut self, n: usize) -> Self {
        self.pin_last_n = n;
        self
    }

    /// Opt out of implicit pinning of a leading system item.
    #[must_use]
    pub const fn without_leading_system_pin(mut self) -> Self {
        self.pin_leading_system = false;
        self
    }

    /// Tokens left for input after reserving room for the response.
    #[must_use]
    pub const fn available_tokens(&self) -> u32 {
        self.max_tokens.saturating_sub(self.reserve_for_output)
    }
}

//! Per-token delay model.
//!
//! Base delay comes from the config snapshot; with `variable_speed` every
//! delay gets a uniform integer offset from the jitter range, floored at
//! zero. A seeded ChaCha8 stream makes jittered runs reproducible.

use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::playback::PlaybackConfig;
use crate::script::Token;

pub struct DelayModel {
    rng: ChaCha8Rng,
}

impl DelayModel {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self { rng }
    }

    /// Wait before the token that follows `token`.
    ///
    /// `None` means no timer: the token hands control back to the operator.
    pub fn delay_after(&mut self, token: &Token, config: &PlaybackConfig) -> Option<Duration> {
        match token {
            Token::Pause => None,
            Token::Wait { millis } => Some(Duration::from_millis(u64::from(*millis))),
            Token::Character(_)
            | Token::Newline
            | Token::Scroll { .. }
            | Token::RepeatKey { .. }
            | Token::Chord { .. } => Some(self.base_delay(config)),
        }
    }

    /// Base delay, jittered when enabled.
    pub fn base_delay(&mut self, config: &PlaybackConfig) -> Duration {
        let base = i64::try_from(config.speed_ms).unwrap_or(i64::MAX);
        let offset = if config.variable_speed {
            let (lo, hi) = ordered(config.jitter_min_ms, config.jitter_max_ms);
            self.rng.gen_range(lo..=hi)
        } else {
            0
        };
        let millis = base.saturating_add(offset).max(0);
        Duration::from_millis(millis.unsigned_abs())
    }
}

fn ordered(a: i64, b: i64) -> (i64, i64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

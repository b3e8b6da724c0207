//! Human-paced text entry.

use folio_core::PacingConfig;
use rand::Rng;
use std::time::Duration;

/// Average word length used to turn words-per-minute into characters.
const CHARS_PER_WORD: f64 = 5.0;
const PAUSE_MIN_MS: u64 = 150;
const PAUSE_MAX_MS: u64 = 400;

#[derive(Debug, Clone, PartialEq)]
pub struct TypingPacing {
    enabled: bool,
    wpm_min: u32,
    wpm_max: u32,
    pause_chance: f64,
}

impl TypingPacing {
    pub fn from_config(config: &PacingConfig) -> Self {
        Self {
            enabled: config.enabled,
            wpm_min: config.wpm_min.max(1),
            wpm_max: config.wpm_max.max(config.wpm_min.max(1)),
            pause_chance: config.pause_chance.clamp(0.0, 1.0),
        }
    }

    /// Insert text in one step.
    pub fn instant() -> Self {
        Self {
            enabled: false,
            wpm_min: 1,
            wpm_max: 1,
            pause_chance: 0.0,
        }
    }

    pub fn is_instant(&self) -> bool {
        !self.enabled
    }

    /// Delay to wait after each character of `text`.
    ///
    /// Drawn up front so no RNG is held across an await point.
    pub fn schedule(&self, text: &str) -> Vec<Duration> {
        if self.is_instant() {
            return Vec::new();
        }
        let mut rng = rand::thread_rng();
        text.chars().map(|_| self.next_delay(&mut rng)).collect()
    }

    fn next_delay<R: Rng>(&self, rng: &mut R) -> Duration {
        let wpm = rng.gen_range(self.wpm_min..=self.wpm_max) as f64;
        let per_char_ms = 60_000.0 / (wpm * CHARS_PER_WORD);
        let mut delay = Duration::from_secs_f64(per_char_ms / 1000.0);
        if self.pause_chance > 0.0 && rng.gen_bool(self.pause_chance) {
            delay += Duration::from_millis(rng.gen_range(PAUSE_MIN_MS..=PAUSE_MAX_MS));
        }
        delay
    }
}

impl Default for TypingPacing {
    fn default() -> Self {
        Self::from_config(&PacingConfig::default())
    }
}

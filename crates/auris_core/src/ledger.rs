//! Time-to-first-audio bookkeeping, one entry per turn (`item_id`).
//!
//! A turn's lifecycle: `speech_stopped` stamps `eos_proxy_ms`, the first
//! `response.audio.delta` for that turn stamps `first_audio_delta_ms`, and
//! the playback epoch it triggered resolving (via [`crate::playback`]'s
//! play-started signal) stamps `first_audible_ms`. All three are optional
//! until their event arrives; a turn can be garbage in the map forever if
//! its response never plays (e.g. it was barged-in before a single delta).

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct TurnTtfa {
    pub turn_id: String,
    pub eos_proxy_ms: Option<i64>,
    pub first_audio_delta_ms: Option<i64>,
    pub first_audible_ms: Option<i64>,
}

impl TurnTtfa {
    pub fn new(turn_id: impl Into<String>) -> Self {
        Self {
            turn_id: turn_id.into(),
            ..Default::default()
        }
    }

    pub fn with_eos_proxy(turn_id: impl Into<String>, eos_proxy_ms: i64) -> Self {
        Self {
            turn_id: turn_id.into(),
            eos_proxy_ms: Some(eos_proxy_ms),
            ..Default::default()
        }
    }

    /// Latency from end-of-speech proxy to the first audio delta received.
    pub fn ttf_delta_ms(&self) -> Option<i64> {
        match (self.eos_proxy_ms, self.first_audio_delta_ms) {
            (Some(eos), Some(delta)) => Some(delta - eos),
            _ => None,
        }
    }

    /// Latency from end-of-speech proxy to the first audible sample played.
    pub fn ttfa_ms(&self) -> Option<i64> {
        match (self.eos_proxy_ms, self.first_audible_ms) {
            (Some(eos), Some(audible)) => Some(audible - eos),
            _ => None,
        }
    }
}

/// Per-session turn ledger plus the epoch -> turn attribution map used to
/// route a playback-start epoch back to the turn that produced it.
#[derive(Debug, Default)]
pub struct TurnLedger {
    turns: HashMap<String, TurnTtfa>,
    epoch_to_turn: HashMap<u64, String>,
}

impl TurnLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_speech_stopped(&mut self, turn_id: &str, now_ms: i64) {
        self.turns
            .insert(turn_id.to_string(), TurnTtfa::with_eos_proxy(turn_id, now_ms));
    }

    /// Record the first audio delta for a turn, if one hasn't been recorded
    /// yet, and map the playback epoch it produced back to this turn.
    /// Returns `true` if this was the first delta for the turn.
    pub fn record_first_audio_delta(&mut self, turn_id: &str, now_ms: i64, epoch: Option<u64>) -> bool {
        let turn = self
            .turns
            .entry(turn_id.to_string())
            .or_insert_with(|| TurnTtfa::new(turn_id));

        if turn.first_audio_delta_ms.is_some() {
            return false;
        }

        turn.first_audio_delta_ms = Some(now_ms);
        if let Some(epoch) = epoch {
            self.epoch_to_turn.insert(epoch, turn_id.to_string());
        }
        true
    }

    /// Resolve a playback-start epoch to its turn and stamp first_audible_ms.
    /// Returns the completed ledger entry, if this epoch maps to a known turn
    /// whose first audible sample hadn't already been recorded.
    pub fn record_play_started(&mut self, epoch: u64, now_ms: i64) -> Option<TurnTtfa> {
        let turn_id = self.epoch_to_turn.remove(&epoch)?;
        let turn = self.turns.get_mut(&turn_id)?;
        if turn.first_audible_ms.is_some() {
            return None;
        }
        turn.first_audible_ms = Some(now_ms);
        Some(turn.clone())
    }

    /// Barge-in cancellation: any in-flight epoch attributions are stale.
    pub fn clear_epoch_attributions(&mut self) {
        self.epoch_to_turn.clear();
    }

    pub fn get(&self, turn_id: &str) -> Option<&TurnTtfa> {
        self.turns.get(turn_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttf_delta_and_ttfa_require_both_ends() {
        let mut t = TurnTtfa::with_eos_proxy("turn-1", 1000);
        assert!(t.ttf_delta_ms().is_none());
        t.first_audio_delta_ms = Some(1150);
        assert_eq!(t.ttf_delta_ms(), Some(150));

        t.first_audible_ms = Some(1300);
        assert_eq!(t.ttfa_ms(), Some(300));
    }

    #[test]
    fn test_record_first_audio_delta_only_stamps_once() {
        let mut ledger = TurnLedger::new();
        ledger.record_speech_stopped("turn-1", 1000);

        let first = ledger.record_first_audio_delta("turn-1", 1100, Some(1));
        assert!(first);
        let second = ledger.record_first_audio_delta("turn-1", 1200, Some(2));
        assert!(!second);

        assert_eq!(ledger.get("turn-1").unwrap().first_audio_delta_ms, Some(1100));
    }

    #[test]
    fn test_play_started_resolves_epoch_to_turn() {
        let mut ledger = TurnLedger::new();
        ledger.record_speech_stopped("turn-1", 1000);
        ledger.record_first_audio_delta("turn-1", 1100, Some(42));

        let resolved = ledger.record_play_started(42, 1250);
        assert!(resolved.is_some());
        assert_eq!(resolved.unwrap().first_audible_ms, Some(1250));

        // unknown epoch resolves to nothing
        assert!(ledger.record_play_started(999, 1300).is_none());
    }

    #[test]
    fn test_clear_epoch_attributions_drops_pending_mappings() {
        let mut ledger = TurnLedger::new();
        ledger.record_speech_stopped("turn-1", 1000);
        ledger.record_first_audio_delta("turn-1", 1100, Some(7));
        ledger.clear_epoch_attributions();
        assert!(ledger.record_play_started(7, 1200).is_none());
    }
}

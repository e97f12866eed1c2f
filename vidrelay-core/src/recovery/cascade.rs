use std::fmt;

use serde::Serialize;

/// Recovery strategies, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryTier {
    CopyRemux,
    AudioRepair,
    FullReencode,
}

impl RecoveryTier {
    pub const ORDER: [RecoveryTier; 3] = [
        RecoveryTier::CopyRemux,
        RecoveryTier::AudioRepair,
        RecoveryTier::FullReencode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryTier::CopyRemux => "copy-remux",
            RecoveryTier::AudioRepair => "audio-repair",
            RecoveryTier::FullReencode => "full-reencode",
        }
    }

    pub fn next(&self) -> Option<RecoveryTier> {
        match self {
            RecoveryTier::CopyRemux => Some(RecoveryTier::AudioRepair),
            RecoveryTier::AudioRepair => Some(RecoveryTier::FullReencode),
            RecoveryTier::FullReencode => None,
        }
    }
}

impl fmt::Display for RecoveryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierOutcome {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeState {
    Attempting(RecoveryTier),
    Recovered(RecoveryTier),
    Exhausted,
}

impl CascadeState {
    pub fn start() -> Self {
        CascadeState::Attempting(RecoveryTier::CopyRemux)
    }

    pub fn transition(self, outcome: TierOutcome) -> Self {
        match (self, outcome) {
            (CascadeState::Attempting(tier), TierOutcome::Succeeded) => {
                CascadeState::Recovered(tier)
            }
            (CascadeState::Attempting(tier), TierOutcome::Failed) => tier
                .next()
                .map(CascadeState::Attempting)
                .unwrap_or(CascadeState::Exhausted),
            (terminal, _) => terminal,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CascadeState::Attempting(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_success_is_terminal() {
        let state = CascadeState::start().transition(TierOutcome::Succeeded);
        assert_eq!(state, CascadeState::Recovered(RecoveryTier::CopyRemux));
        assert!(state.is_terminal());
        assert_eq!(state.transition(TierOutcome::Failed), state);
    }

    #[test]
    fn failures_walk_tiers_in_order() {
        let mut state = CascadeState::start();
        let mut visited = Vec::new();
        while let CascadeState::Attempting(tier) = state {
            visited.push(tier);
            state = state.transition(TierOutcome::Failed);
        }
        assert_eq!(visited, RecoveryTier::ORDER.to_vec());
        assert_eq!(state, CascadeState::Exhausted);
    }

    #[test]
    fn audio_repair_success_skips_reencode() {
        let state = CascadeState::start()
            .transition(TierOutcome::Failed)
            .transition(TierOutcome::Succeeded);
        assert_eq!(state, CascadeState::Recovered(RecoveryTier::AudioRepair));
    }
}

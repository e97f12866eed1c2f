use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryTier {
    Lightweight,
    HighCapacity,
    Segmented,
}

impl DeliveryTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryTier::Lightweight => "lightweight",
            DeliveryTier::HighCapacity => "high-capacity",
            DeliveryTier::Segmented => "segmented",
        }
    }
}

impl fmt::Display for DeliveryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteState {
    Start,
    Lightweight,
    HighCapacity,
    Segmentation,
    Delivered(DeliveryTier),
    Failed,
}

impl RouteState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RouteState::Delivered(_) | RouteState::Failed)
    }
}

/// What a tier attempt reported back to the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSignal {
    Succeeded,
    TooLarge,
    Failed,
}

/// Per-artifact inputs to the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutePolicy {
    pub size: u64,
    /// `None` when the lightweight transport is not configured.
    pub lightweight_limit: Option<u64>,
    /// `None` when the high-capacity transport is not configured.
    pub high_capacity_ceiling: Option<u64>,
    pub segmentation: bool,
    pub fallthrough_on_error: bool,
}

impl RoutePolicy {
    pub fn transition(&self, state: RouteState, signal: Option<RouteSignal>) -> RouteState {
        use RouteSignal::*;
        match (state, signal) {
            (RouteState::Start, _) => {
                if self.lightweight_limit.is_some_and(|limit| self.size <= limit) {
                    RouteState::Lightweight
                } else {
                    self.beyond_lightweight()
                }
            }
            (RouteState::Lightweight, Some(Succeeded)) => {
                RouteState::Delivered(DeliveryTier::Lightweight)
            }
            (RouteState::Lightweight, Some(TooLarge)) => self.beyond_lightweight(),
            (RouteState::Lightweight, _) if self.fallthrough_on_error => self.beyond_lightweight(),
            (RouteState::Lightweight, _) => RouteState::Failed,
            (RouteState::HighCapacity, Some(Succeeded)) => {
                RouteState::Delivered(DeliveryTier::HighCapacity)
            }
            (RouteState::HighCapacity, _) if self.segmentation => RouteState::Segmentation,
            (RouteState::HighCapacity, _) => RouteState::Failed,
            (RouteState::Segmentation, Some(Succeeded)) => {
                RouteState::Delivered(DeliveryTier::Segmented)
            }
            (RouteState::Segmentation, _) => RouteState::Failed,
            (terminal, _) => terminal,
        }
    }

    fn beyond_lightweight(&self) -> RouteState {
        match self.high_capacity_ceiling {
            Some(ceiling) if self.size <= ceiling => RouteState::HighCapacity,
            Some(_) if self.segmentation => RouteState::Segmentation,
            _ => RouteState::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn policy(size: u64) -> RoutePolicy {
        RoutePolicy {
            size,
            lightweight_limit: Some(190 * MIB),
            high_capacity_ceiling: Some(2048 * MIB),
            segmentation: true,
            fallthrough_on_error: true,
        }
    }

    #[test]
    fn small_artifacts_start_lightweight() {
        let p = policy(50 * MIB);
        assert_eq!(p.transition(RouteState::Start, None), RouteState::Lightweight);
        assert_eq!(
            p.transition(RouteState::Lightweight, Some(RouteSignal::Succeeded)),
            RouteState::Delivered(DeliveryTier::Lightweight)
        );
    }

    #[test]
    fn large_artifacts_skip_lightweight() {
        let p = policy(500 * MIB);
        assert_eq!(p.transition(RouteState::Start, None), RouteState::HighCapacity);
        let huge = policy(5 * 1024 * MIB);
        assert_eq!(huge.transition(RouteState::Start, None), RouteState::Segmentation);
    }

    #[test]
    fn too_large_always_falls_through() {
        let p = RoutePolicy {
            fallthrough_on_error: false,
            ..policy(10 * MIB)
        };
        assert_eq!(
            p.transition(RouteState::Lightweight, Some(RouteSignal::TooLarge)),
            RouteState::HighCapacity
        );
        assert_eq!(
            p.transition(RouteState::Lightweight, Some(RouteSignal::Failed)),
            RouteState::Failed
        );
    }

    #[test]
    fn high_capacity_failure_segments_only_when_enabled() {
        let p = policy(500 * MIB);
        assert_eq!(
            p.transition(RouteState::HighCapacity, Some(RouteSignal::Failed)),
            RouteState::Segmentation
        );
        let off = RoutePolicy {
            segmentation: false,
            ..p
        };
        assert_eq!(
            off.transition(RouteState::HighCapacity, Some(RouteSignal::Failed)),
            RouteState::Failed
        );
    }

    #[test]
    fn no_capable_tier_fails_immediately() {
        let p = RoutePolicy {
            lightweight_limit: Some(MIB),
            high_capacity_ceiling: None,
            segmentation: true,
            ..policy(10 * MIB)
        };
        assert_eq!(p.transition(RouteState::Start, None), RouteState::Failed);
    }

    #[test]
    fn terminal_states_are_sticky() {
        let p = policy(MIB);
        for state in [RouteState::Failed, RouteState::Delivered(DeliveryTier::Segmented)] {
            assert!(state.is_terminal());
            assert_eq!(p.transition(state, Some(RouteSignal::Succeeded)), state);
        }
    }
}

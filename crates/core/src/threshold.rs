use std::fmt;

use serde::{Deserialize, Serialize};

/// Star tally at which a source message gets a highlight.
pub const PUBLISH_THRESHOLD: u32 = 3;
/// Lowest tally shown with the second tier icon.
pub const GLOWING_TIER_THRESHOLD: u32 = 6;
/// Lowest tally shown with the third tier icon.
pub const DIZZY_TIER_THRESHOLD: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HighlightState {
    Absent,
    Published,
}

impl HighlightState {
    pub fn from_record(record_exists: bool) -> Self {
        if record_exists {
            Self::Published
        } else {
            Self::Absent
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HighlightAction {
    None,
    Create,
    Update,
    Delete,
}

impl HighlightAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for HighlightAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: HighlightState,
    pub to: HighlightState,
    pub tally: u32,
    pub action: HighlightAction,
}

/// Decides what to do with a source message given its live star tally and whether a
/// highlight record already exists for it.
pub fn evaluate(tally: u32, record_exists: bool) -> TransitionOutcome {
    use HighlightAction::{Create, Delete, Update};
    use HighlightState::{Absent, Published};

    let from = HighlightState::from_record(record_exists);
    let qualifies = tally >= PUBLISH_THRESHOLD;

    let (to, action) = match (from, qualifies) {
        (Absent, false) => (Absent, HighlightAction::None),
        (Absent, true) => (Published, Create),
        (Published, true) => (Published, Update),
        (Published, false) => (Absent, Delete),
    };

    TransitionOutcome { from, to, tally, action }
}

/// Cosmetic icon bucket. Lower bounds are inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Star,
    GlowingStar,
    Dizzy,
}

impl Tier {
    pub fn for_tally(tally: u32) -> Self {
        if tally >= DIZZY_TIER_THRESHOLD {
            Self::Dizzy
        } else if tally >= GLOWING_TIER_THRESHOLD {
            Self::GlowingStar
        } else {
            Self::Star
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Self::Star => "⭐",
            Self::GlowingStar => "🌟",
            Self::Dizzy => "💫",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{evaluate, HighlightAction, HighlightState, Tier, PUBLISH_THRESHOLD};

    #[test]
    fn below_threshold_without_record_is_a_no_op() {
        for tally in 0..PUBLISH_THRESHOLD {
            let outcome = evaluate(tally, false);
            assert_eq!(outcome.action, HighlightAction::None, "tally {tally}");
            assert_eq!(outcome.to, HighlightState::Absent);
        }
    }

    #[test]
    fn reaching_threshold_publishes() {
        let outcome = evaluate(3, false);
        assert_eq!(outcome.from, HighlightState::Absent);
        assert_eq!(outcome.to, HighlightState::Published);
        assert_eq!(outcome.action, HighlightAction::Create);
    }

    #[test]
    fn published_message_at_or_above_threshold_is_updated_not_recreated() {
        for tally in [3, 4, 12] {
            let outcome = evaluate(tally, true);
            assert_eq!(outcome.action, HighlightAction::Update, "tally {tally}");
            assert_eq!(outcome.to, HighlightState::Published);
        }
    }

    #[test]
    fn dropping_below_threshold_retracts() {
        let outcome = evaluate(2, true);
        assert_eq!(outcome.from, HighlightState::Published);
        assert_eq!(outcome.to, HighlightState::Absent);
        assert_eq!(outcome.action, HighlightAction::Delete);
    }

    #[test]
    fn tier_boundaries_are_inclusive_on_the_lower_bound() {
        assert_eq!(Tier::for_tally(3), Tier::Star);
        assert_eq!(Tier::for_tally(5), Tier::Star);
        assert_eq!(Tier::for_tally(6), Tier::GlowingStar);
        assert_eq!(Tier::for_tally(9), Tier::GlowingStar);
        assert_eq!(Tier::for_tally(10), Tier::Dizzy);
        assert_eq!(Tier::for_tally(250), Tier::Dizzy);
    }

    #[test]
    fn tier_icons_are_stable() {
        assert_eq!(Tier::Star.icon(), "⭐");
        assert_eq!(Tier::GlowingStar.icon(), "🌟");
        assert_eq!(Tier::Dizzy.icon(), "💫");
    }
}

//! Keep-or-discard decisions for captured recordings

use crate::config::RecordingMode;
use crate::outcome::Outcome;

/// The retention table
///
/// | mode             | Passed | Failed | Skipped |
/// |------------------|--------|--------|---------|
/// | `RecordAll`      | keep   | keep   | keep    |
/// | `RecordFailing`  | drop   | keep   | drop    |
/// | `Off`            | drop   | drop   | drop    |
#[must_use]
pub const fn should_retain(mode: RecordingMode, outcome: &Outcome) -> bool {
    match mode {
        RecordingMode::RecordAll => true,
        RecordingMode::RecordFailing => outcome.is_failure(),
        RecordingMode::Off => false,
    }
}

/// Decides whether a finished recording is kept
pub trait RetentionPolicy: Send + Sync {
    /// Keep the recording for this mode and outcome?
    fn should_retain(&self, mode: RecordingMode, outcome: &Outcome) -> bool;
}

/// The retention table, with skipped tests optionally kept under
/// `RecordFailing`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultRetention {
    /// Treat `Skipped` like `Failed` when only failures are recorded
    pub retain_skipped_when_failing: bool,
}

impl RetentionPolicy for DefaultRetention {
    fn should_retain(&self, mode: RecordingMode, outcome: &Outcome) -> bool {
        match (mode, outcome) {
            (RecordingMode::RecordFailing, Outcome::Skipped) => self.retain_skipped_when_failing,
            _ => should_retain(mode, outcome),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MODES: [RecordingMode; 3] = [
        RecordingMode::RecordAll,
        RecordingMode::RecordFailing,
        RecordingMode::Off,
    ];

    fn outcomes() -> [Outcome; 3] {
        [
            Outcome::Passed,
            Outcome::Failed("assertion".to_string()),
            Outcome::Skipped,
        ]
    }

    #[test]
    fn test_retention_table() {
        let expected = [
            [true, true, true],
            [false, true, false],
            [false, false, false],
        ];

        for (mode, row) in MODES.iter().zip(expected) {
            for (outcome, keep) in outcomes().iter().zip(row) {
                assert_eq!(
                    should_retain(*mode, outcome),
                    keep,
                    "{mode:?} / {outcome:?}"
                );
            }
        }
    }

    #[test]
    fn test_default_policy_matches_table() {
        let policy = DefaultRetention::default();
        for mode in MODES {
            for outcome in outcomes() {
                assert_eq!(policy.should_retain(mode, &outcome), should_retain(mode, &outcome));
            }
        }
    }

    #[test]
    fn test_retain_skipped_when_failing() {
        let policy = DefaultRetention {
            retain_skipped_when_failing: true,
        };

        assert!(policy.should_retain(RecordingMode::RecordFailing, &Outcome::Skipped));
        assert!(!policy.should_retain(RecordingMode::RecordFailing, &Outcome::Passed));
        assert!(!policy.should_retain(RecordingMode::Off, &Outcome::Skipped));
    }

    proptest! {
        #[test]
        fn failures_kept_unless_off(reason in ".*", retain_skipped in any::<bool>()) {
            let policy = DefaultRetention { retain_skipped_when_failing: retain_skipped };
            let outcome = Outcome::Failed(reason);
            prop_assert!(policy.should_retain(RecordingMode::RecordAll, &outcome));
            prop_assert!(policy.should_retain(RecordingMode::RecordFailing, &outcome));
            prop_assert!(!policy.should_retain(RecordingMode::Off, &outcome));
        }
    }
}

//! Job stage and status model, and the transition table.
//!
//! Stages are ordinal and stored as SMALLINT; statuses are an overlay whose
//! allowed values depend on the stage. Every transition the orchestrator
//! performs is checked against [`check_transition`] before it is written.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Stage / status ID type matching SMALLINT in the database.
pub type StageId = i16;

macro_rules! define_ordinal_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$( $name::$variant ),+];

            /// Return the database ID.
            pub fn id(self) -> StageId {
                self as StageId
            }

            pub fn from_id(id: StageId) -> Option<Self> {
                match id {
                    $( $val => Some($name::$variant), )+
                    _ => None,
                }
            }

            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $label, )+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $( $label => Some($name::$variant), )+
                    _ => None,
                }
            }
        }

        impl From<$name> for StageId {
            fn from(value: $name) -> Self {
                value as StageId
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

define_ordinal_enum! {
    /// Processing stage. Ordering follows the pipeline.
    Stage {
        Ingested = 0 => "ingested",
        Extracted = 1 => "extracted",
        MatchingReview = 2 => "matching_review",
        Validating = 3 => "validating",
        /// Entered only when validation finds critical issues.
        ValidationReview = 4 => "validation_review",
        Generating = 5 => "generating",
        ReadyForDelivery = 6 => "ready_for_delivery",
        Completed = 7 => "completed",
    }
}

define_ordinal_enum! {
    /// Status overlay on the current stage.
    JobStatus {
        Queued = 1 => "queued",
        Processing = 2 => "processing",
        AwaitingReview = 3 => "awaiting_review",
        Completed = 4 => "completed",
        Error = 5 => "error",
    }
}

impl Stage {
    /// Stages whose work is performed by the runner rather than a person.
    pub fn is_automated(self) -> bool {
        matches!(
            self,
            Stage::Ingested | Stage::Extracted | Stage::Validating | Stage::Generating
        )
    }

    pub fn is_human_gate(self) -> bool {
        matches!(
            self,
            Stage::MatchingReview | Stage::ValidationReview | Stage::ReadyForDelivery
        )
    }

    /// Status a job takes on when it enters this stage normally.
    pub fn entry_status(self) -> JobStatus {
        match self {
            Stage::Completed => JobStatus::Completed,
            s if s.is_human_gate() => JobStatus::AwaitingReview,
            _ => JobStatus::Queued,
        }
    }

    pub fn allows_status(self, status: JobStatus) -> bool {
        match self {
            Stage::Completed => status == JobStatus::Completed,
            s if s.is_human_gate() => {
                matches!(status, JobStatus::AwaitingReview | JobStatus::Error)
            }
            _ => matches!(
                status,
                JobStatus::Queued | JobStatus::Processing | JobStatus::Error
            ),
        }
    }

    /// All stages up to and including `self`.
    pub fn through(self) -> impl Iterator<Item = Stage> {
        Stage::ALL.iter().copied().filter(move |s| *s <= self)
    }
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// Kind of state change, recorded in the job log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Advance,
    Rollback,
    Override,
    Failure,
    Recovery,
    Claim,
}

impl TransitionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransitionKind::Advance => "advance",
            TransitionKind::Rollback => "rollback",
            TransitionKind::Override => "override",
            TransitionKind::Failure => "failure",
            TransitionKind::Recovery => "recovery",
            TransitionKind::Claim => "claim",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "advance" => Some(TransitionKind::Advance),
            "rollback" => Some(TransitionKind::Rollback),
            "override" => Some(TransitionKind::Override),
            "failure" => Some(TransitionKind::Failure),
            "recovery" => Some(TransitionKind::Recovery),
            "claim" => Some(TransitionKind::Claim),
            _ => None,
        }
    }
}

/// Stages a job may be restarted at by recovery.
pub const RESUMABLE_STAGES: [Stage; 4] = [
    Stage::Ingested,
    Stage::Extracted,
    Stage::Validating,
    Stage::Generating,
];

const ADVANCES: [(Stage, Stage); 7] = [
    (Stage::Ingested, Stage::Extracted),
    (Stage::Extracted, Stage::MatchingReview),
    (Stage::MatchingReview, Stage::Validating),
    (Stage::Validating, Stage::Generating),
    (Stage::Validating, Stage::ValidationReview),
    (Stage::Generating, Stage::ReadyForDelivery),
    (Stage::ReadyForDelivery, Stage::Completed),
];

/// Check a stage change against the transition table.
///
/// Only rollback and recovery may move a job to an earlier stage.
pub fn check_transition(from: Stage, to: Stage, kind: TransitionKind) -> Result<(), CoreError> {
    let allowed = match kind {
        TransitionKind::Advance => ADVANCES.contains(&(from, to)),
        TransitionKind::Rollback => {
            from == Stage::ValidationReview && to == Stage::MatchingReview
        }
        TransitionKind::Override => {
            from == Stage::ValidationReview && to == Stage::Generating
        }
        TransitionKind::Failure => from == to && from != Stage::Completed,
        TransitionKind::Claim => from == to && from.is_automated(),
        TransitionKind::Recovery => {
            RESUMABLE_STAGES.contains(&to) && to <= from && from != Stage::Completed
        }
    };
    if !allowed {
        return Err(CoreError::Guard(format!(
            "{} from '{from}' to '{to}' is not a permitted transition",
            kind.as_str()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn stage_ids_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(Stage::from_id(stage.id()), Some(*stage));
            assert_eq!(Stage::parse(stage.as_str()), Some(*stage));
        }
        assert_eq!(Stage::from_id(42), None);
    }

    #[test]
    fn serde_label_matches_as_str() {
        let json = serde_json::to_string(&Stage::ReadyForDelivery).unwrap();
        assert_eq!(json, "\"ready_for_delivery\"");
        let json = serde_json::to_string(&JobStatus::AwaitingReview).unwrap();
        assert_eq!(json, "\"awaiting_review\"");
    }

    #[test]
    fn stages_are_ordered() {
        assert!(Stage::Ingested < Stage::Extracted);
        assert!(Stage::ValidationReview < Stage::Generating);
        assert_eq!(Stage::Validating.through().count(), 4);
    }

    #[test]
    fn allowed_statuses_per_stage() {
        assert!(Stage::Extracted.allows_status(JobStatus::Processing));
        assert!(!Stage::Extracted.allows_status(JobStatus::AwaitingReview));
        assert!(Stage::MatchingReview.allows_status(JobStatus::Error));
        assert!(!Stage::MatchingReview.allows_status(JobStatus::Queued));
        assert!(Stage::Completed.allows_status(JobStatus::Completed));
        assert!(!Stage::Completed.allows_status(JobStatus::Error));
        for stage in Stage::ALL {
            assert!(stage.allows_status(stage.entry_status()));
        }
    }

    #[test]
    fn forward_chain_is_permitted() {
        assert!(check_transition(Stage::Ingested, Stage::Extracted, TransitionKind::Advance).is_ok());
        assert!(
            check_transition(Stage::Validating, Stage::ValidationReview, TransitionKind::Advance)
                .is_ok()
        );
    }

    #[test]
    fn skipping_a_stage_is_a_guard_violation() {
        assert_matches!(
            check_transition(Stage::Extracted, Stage::Validating, TransitionKind::Advance),
            Err(CoreError::Guard(_))
        );
    }

    #[test]
    fn only_rollback_and_recovery_go_backwards() {
        assert!(check_transition(
            Stage::ValidationReview,
            Stage::MatchingReview,
            TransitionKind::Rollback
        )
        .is_ok());
        assert!(check_transition(Stage::Generating, Stage::Validating, TransitionKind::Recovery)
            .is_ok());
        assert!(check_transition(
            Stage::ValidationReview,
            Stage::MatchingReview,
            TransitionKind::Advance
        )
        .is_err());
        assert!(check_transition(Stage::Generating, Stage::MatchingReview, TransitionKind::Recovery)
            .is_err());
    }

    #[test]
    fn override_only_from_validation_review() {
        assert!(
            check_transition(Stage::ValidationReview, Stage::Generating, TransitionKind::Override)
                .is_ok()
        );
        assert!(
            check_transition(Stage::Validating, Stage::Generating, TransitionKind::Override)
                .is_err()
        );
    }

    #[test]
    fn claims_only_on_automated_stages() {
        assert!(check_transition(Stage::Generating, Stage::Generating, TransitionKind::Claim).is_ok());
        assert!(
            check_transition(Stage::MatchingReview, Stage::MatchingReview, TransitionKind::Claim)
                .is_err()
        );
    }
}

//! Reason derivation: the authoritative table mapping role + detail fields
//! to a `(reason, state)` pair, evaluated top-down.

use attn_core::types::{CiStatus, PrReason, PrRole, PrState, ReviewStatus};

/// Evaluate the reason-derivation table for a PR's current role and detail
/// fields. `mergeable` is the tri-state `mergeable` flag; `None` means
/// GitHub hasn't computed it yet.
pub fn derive_reason(
    role: PrRole,
    ci_status: CiStatus,
    review_status: ReviewStatus,
    mergeable: Option<bool>,
) -> (PrReason, PrState) {
    if role == PrRole::Author
        && ci_status == CiStatus::Success
        && review_status == ReviewStatus::Approved
        && mergeable == Some(true)
    {
        return (PrReason::ReadyToMerge, PrState::Waiting);
    }
    if role == PrRole::Author && ci_status == CiStatus::Failure {
        return (PrReason::CiFailed, PrState::Waiting);
    }
    if role == PrRole::Author && review_status == ReviewStatus::ChangesRequested {
        return (PrReason::ChangesRequested, PrState::Waiting);
    }
    if role == PrRole::Reviewer && review_status == ReviewStatus::ReviewRequired {
        return (PrReason::ReviewNeeded, PrState::Waiting);
    }
    (PrReason::Open, PrState::Working)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn author_with_green_ci_and_approval_is_ready_to_merge() {
        let (reason, state) = derive_reason(
            PrRole::Author,
            CiStatus::Success,
            ReviewStatus::Approved,
            Some(true),
        );
        assert_eq!(reason, PrReason::ReadyToMerge);
        assert_eq!(state, PrState::Waiting);
    }

    #[test]
    fn author_with_failing_ci_takes_priority_over_approval() {
        let (reason, _) = derive_reason(
            PrRole::Author,
            CiStatus::Failure,
            ReviewStatus::Approved,
            Some(true),
        );
        assert_eq!(reason, PrReason::CiFailed);
    }

    #[test]
    fn author_with_changes_requested() {
        let (reason, state) = derive_reason(
            PrRole::Author,
            CiStatus::Pending,
            ReviewStatus::ChangesRequested,
            None,
        );
        assert_eq!(reason, PrReason::ChangesRequested);
        assert_eq!(state, PrState::Waiting);
    }

    #[test]
    fn reviewer_needing_review() {
        let (reason, state) = derive_reason(
            PrRole::Reviewer,
            CiStatus::Pending,
            ReviewStatus::ReviewRequired,
            None,
        );
        assert_eq!(reason, PrReason::ReviewNeeded);
        assert_eq!(state, PrState::Waiting);
    }

    #[test]
    fn otherwise_falls_back_to_open_working() {
        let (reason, state) = derive_reason(
            PrRole::Reviewer,
            CiStatus::Pending,
            ReviewStatus::None,
            None,
        );
        assert_eq!(reason, PrReason::Open);
        assert_eq!(state, PrState::Working);
    }

    #[test]
    fn not_mergeable_falls_through_ready_to_merge_rule() {
        let (reason, _) = derive_reason(
            PrRole::Author,
            CiStatus::Success,
            ReviewStatus::Approved,
            Some(false),
        );
        assert_ne!(reason, PrReason::ReadyToMerge);
    }
}

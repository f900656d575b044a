//! Content lifecycle transitions.
//!
//! Pure functions over `(status, approval_status)`; repositories apply the
//! resulting [`Transition`] conditionally on the state it was computed from.
//! Approval and scheduling are independent: an item only becomes SCHEDULED
//! once it is both approved and has a `scheduled_for` time.

use chrono::{DateTime, Utc};
use sea_orm::ActiveEnum;

use crate::error::JobError;
use crate::models::brand_settings::ApprovalMode;
use crate::models::content_item::{ApprovalStatus, ContentStatus, Model as ContentItem};
use crate::models::content_variation::VariationStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub status: ContentStatus,
    pub approval_status: ApprovalStatus,
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// State for freshly generated content under a brand's approval mode.
pub fn initial(
    mode: ApprovalMode,
    scheduled_for: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Transition {
    match mode {
        ApprovalMode::Manual => Transition {
            status: ContentStatus::Pending,
            approval_status: ApprovalStatus::Pending,
            scheduled_for,
        },
        ApprovalMode::AutoQueue => Transition {
            status: if scheduled_for.is_some() {
                ContentStatus::Scheduled
            } else {
                ContentStatus::Draft
            },
            approval_status: ApprovalStatus::AutoApproved,
            scheduled_for,
        },
        ApprovalMode::AutoPost => Transition {
            status: ContentStatus::Scheduled,
            approval_status: ApprovalStatus::AutoApproved,
            scheduled_for: Some(scheduled_for.unwrap_or(now)),
        },
    }
}

fn scheduled_for(item: &ContentItem) -> Option<DateTime<Utc>> {
    item.scheduled_for.map(|t| t.with_timezone(&Utc))
}

fn ensure_editable(item: &ContentItem, action: &str) -> Result<(), JobError> {
    match item.status {
        ContentStatus::Draft | ContentStatus::Pending | ContentStatus::Scheduled => Ok(()),
        status => Err(JobError::InvalidState(format!(
            "cannot {action} content {} in status {}",
            item.id,
            status.to_value()
        ))),
    }
}

pub fn approve(item: &ContentItem) -> Result<Transition, JobError> {
    ensure_editable(item, "approve")?;
    if item.approval_status != ApprovalStatus::Pending {
        return Err(JobError::InvalidState(format!(
            "content {} is not awaiting approval",
            item.id
        )));
    }

    let scheduled_for = scheduled_for(item);
    Ok(Transition {
        status: if scheduled_for.is_some() {
            ContentStatus::Scheduled
        } else {
            ContentStatus::Draft
        },
        approval_status: ApprovalStatus::Approved,
        scheduled_for,
    })
}

/// Terminal; callers also mark every variation SKIPPED.
pub fn reject(item: &ContentItem) -> Result<Transition, JobError> {
    ensure_editable(item, "reject")?;
    Ok(Transition {
        status: ContentStatus::Archived,
        approval_status: ApprovalStatus::Rejected,
        scheduled_for: scheduled_for(item),
    })
}

/// Sets the publish time. Unapproved content keeps waiting for approval.
pub fn schedule(item: &ContentItem, at: DateTime<Utc>) -> Result<Transition, JobError> {
    ensure_editable(item, "schedule")?;
    if item.approval_status == ApprovalStatus::Rejected {
        return Err(JobError::InvalidState(format!(
            "content {} was rejected",
            item.id
        )));
    }

    Ok(Transition {
        status: if item.approval_status.is_approved() {
            ContentStatus::Scheduled
        } else {
            item.status
        },
        approval_status: item.approval_status,
        scheduled_for: Some(at),
    })
}

/// Guard for SCHEDULED -> PUBLISHING.
pub fn begin_publish(item: &ContentItem) -> Result<Transition, JobError> {
    if item.status != ContentStatus::Scheduled {
        return Err(JobError::InvalidState(format!(
            "content {} cannot be published from status {}",
            item.id,
            item.status.to_value()
        )));
    }
    if !item.approval_status.is_approved() {
        return Err(JobError::InvalidState(format!(
            "content {} is not approved",
            item.id
        )));
    }
    Ok(Transition {
        status: ContentStatus::Publishing,
        approval_status: item.approval_status,
        scheduled_for: scheduled_for(item),
    })
}

pub fn is_due(item: &ContentItem, now: DateTime<Utc>) -> bool {
    item.status == ContentStatus::Scheduled
        && item.approval_status.is_approved()
        && scheduled_for(item).is_some_and(|at| at <= now)
}

/// Final item status from the variations attempted in a publish run.
/// Returns `None` when nothing was attempted.
pub fn publish_outcome(attempted: &[VariationStatus]) -> Option<ContentStatus> {
    if attempted.is_empty() {
        return None;
    }
    let published = attempted
        .iter()
        .filter(|s| **s == VariationStatus::Published)
        .count();
    Some(if published == attempted.len() {
        ContentStatus::Published
    } else if published > 0 {
        ContentStatus::PartiallyPublished
    } else {
        ContentStatus::Failed
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn item(status: ContentStatus, approval_status: ApprovalStatus) -> ContentItem {
        let now = Utc::now().fixed_offset();
        ContentItem {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            brand_id: Uuid::new_v4(),
            title: None,
            body: "body".into(),
            category: None,
            status,
            approval_status,
            scheduled_for: None,
            published_at: None,
            image_url: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn initial_state_follows_approval_mode() {
        let now = Utc::now();
        let later = now + Duration::hours(3);

        let manual = initial(ApprovalMode::Manual, Some(later), now);
        assert_eq!(manual.status, ContentStatus::Pending);
        assert_eq!(manual.approval_status, ApprovalStatus::Pending);

        let queued = initial(ApprovalMode::AutoQueue, None, now);
        assert_eq!(queued.status, ContentStatus::Draft);
        assert_eq!(queued.approval_status, ApprovalStatus::AutoApproved);

        let queued = initial(ApprovalMode::AutoQueue, Some(later), now);
        assert_eq!(queued.status, ContentStatus::Scheduled);

        let posted = initial(ApprovalMode::AutoPost, None, now);
        assert_eq!(posted.status, ContentStatus::Scheduled);
        assert_eq!(posted.scheduled_for, Some(now));
    }

    #[test]
    fn approval_and_scheduling_are_independent() {
        let pending = item(ContentStatus::Pending, ApprovalStatus::Pending);
        let approved = approve(&pending).expect("approve");
        assert_eq!(approved.status, ContentStatus::Draft);
        assert_eq!(approved.approval_status, ApprovalStatus::Approved);

        let at = Utc::now() + Duration::hours(1);
        let scheduled_unapproved = schedule(&pending, at).expect("schedule");
        assert_eq!(scheduled_unapproved.status, ContentStatus::Pending);

        let mut both = pending.clone();
        both.scheduled_for = Some(at.fixed_offset());
        let transition = approve(&both).expect("approve");
        assert_eq!(transition.status, ContentStatus::Scheduled);
    }

    #[test]
    fn reject_archives_and_blocks_further_changes() {
        let pending = item(ContentStatus::Pending, ApprovalStatus::Pending);
        let rejected = reject(&pending).expect("reject");
        assert_eq!(rejected.status, ContentStatus::Archived);
        assert_eq!(rejected.approval_status, ApprovalStatus::Rejected);

        let archived = item(ContentStatus::Archived, ApprovalStatus::Rejected);
        assert!(approve(&archived).is_err());
        assert!(schedule(&archived, Utc::now()).is_err());
    }

    #[test]
    fn publishing_requires_scheduled_and_approved() {
        let draft = item(ContentStatus::Draft, ApprovalStatus::Approved);
        let err = begin_publish(&draft).expect_err("draft rejected");
        assert!(!err.is_retryable());

        let unapproved = item(ContentStatus::Scheduled, ApprovalStatus::Pending);
        assert!(begin_publish(&unapproved).is_err());

        for approval in [ApprovalStatus::Approved, ApprovalStatus::AutoApproved] {
            let ready = item(ContentStatus::Scheduled, approval);
            assert_eq!(
                begin_publish(&ready).expect("eligible").status,
                ContentStatus::Publishing
            );
        }
    }

    #[test]
    fn due_requires_past_schedule_time() {
        let now = Utc::now();
        let mut scheduled = item(ContentStatus::Scheduled, ApprovalStatus::AutoApproved);
        assert!(!is_due(&scheduled, now));

        scheduled.scheduled_for = Some((now + Duration::minutes(5)).fixed_offset());
        assert!(!is_due(&scheduled, now));

        scheduled.scheduled_for = Some((now - Duration::minutes(5)).fixed_offset());
        assert!(is_due(&scheduled, now));
    }

    #[test]
    fn publish_outcome_distinguishes_partial_success() {
        use VariationStatus::*;
        assert_eq!(publish_outcome(&[]), None);
        assert_eq!(
            publish_outcome(&[Published, Published]),
            Some(ContentStatus::Published)
        );
        assert_eq!(
            publish_outcome(&[Published, Published, Failed]),
            Some(ContentStatus::PartiallyPublished)
        );
        assert_eq!(
            publish_outcome(&[Failed, Failed]),
            Some(ContentStatus::Failed)
        );
    }
}

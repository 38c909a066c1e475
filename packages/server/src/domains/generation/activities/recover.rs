use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use crate::common::NonCritical;
use crate::domains::audit::{actions, audit, targets, NewAuditEntry};
use crate::domains::posts::{LifecycleError, PostErrorCode, PostStatus, StatusChange};
use crate::domains::schedules::EntryStatus;
use crate::kernel::ServerDeps;

/// Posts recovered per sweep.
const RECOVERY_BATCH: i64 = 50;

/// Fail posts whose generate worker died after claiming them.
///
/// A re-delivered generate job leaves a GENERATING post alone; this sweep is
/// the only way out of that state.
pub async fn recover_stalled_generations(deps: &ServerDeps) -> Result<usize> {
    let updated_before = Utc::now() - deps.config.generation_stall_timeout;
    let stalled = deps
        .store
        .stalled_generating(updated_before, RECOVERY_BATCH)
        .await?;

    let mut recovered = 0;
    for post in stalled {
        let message = format!("generation stalled since {}", post.updated_at);
        let change = StatusChange::new(PostStatus::Generating, PostStatus::Failed)
            .with_error(PostErrorCode::GenerationError, message.clone());

        match deps.store.transition_post(post.id, change).await {
            Ok(_) => {}
            Err(e) if matches!(e.downcast_ref::<LifecycleError>(), Some(LifecycleError::StaleStatus { .. })) => {
                debug!(post_id = %post.id, "Stalled post finished meanwhile");
                continue;
            }
            Err(e) => return Err(e),
        }
        warn!(post_id = %post.id, stalled_since = %post.updated_at, "Stalled generation marked FAILED");

        if let Some(entry_id) = post.schedule_entry_id {
            NonCritical::new("entry_failed")
                .run(deps.store.set_entry_status(entry_id, EntryStatus::Failed))
                .await;
        }
        audit(
            NewAuditEntry::new(
                deps.system_member_id,
                actions::POST_GENERATION_FAILED,
                targets::POST,
                post.id,
            )
            .with_metadata(json!({ "error": message, "stalled_since": post.updated_at })),
            deps,
        )
        .await;
        recovered += 1;
    }

    Ok(recovered)
}

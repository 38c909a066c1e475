use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::domains::audit::{actions, audit, targets, NewAuditEntry};
use crate::kernel::ServerDeps;

/// Mark overdue review requests EXPIRED. Posts stay in PENDING_REVIEW
/// for manual follow-up.
pub async fn expire_stale_reviews(deps: &ServerDeps) -> Result<usize> {
    let expired = deps.store.expire_reviews(Utc::now()).await?;

    for request in &expired {
        info!(post_id = %request.post_id, request_id = %request.id, "Review request expired");
        audit(
            NewAuditEntry::new(
                deps.system_member_id,
                actions::REVIEW_EXPIRED,
                targets::REVIEW_REQUEST,
                request.id,
            )
            .with_metadata(json!({
                "post_id": request.post_id,
                "expired_at": request.expires_at,
            })),
            deps,
        )
        .await;
    }

    Ok(expired.len())
}

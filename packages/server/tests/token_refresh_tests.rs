//! Token refresh scan and worker.

mod common;

use autopost_core::domains::accounts::{
    refresh_account_token, scan_expiring_tokens, AccountStatus, AccountStore, RefreshOutcome,
    TOKEN_REFRESH_JOB,
};
use autopost_core::kernel::jobs::{FailureDisposition, JobRun};
use autopost_core::kernel::test_dependencies::TEST_ACCESS_TOKEN;
use autopost_core::kernel::{PlatformError, PlatformErrorKind};
use chrono::{Duration, Utc};

use crate::common::Pipeline;

#[tokio::test]
async fn expiring_token_is_refreshed_once() {
    let p = Pipeline::new();
    let account = p
        .test
        .seed_account(Utc::now() + Duration::days(2))
        .await
        .unwrap();

    assert_eq!(scan_expiring_tokens(&p.deps).await.unwrap(), 1);
    // The first job is still pending.
    assert_eq!(scan_expiring_tokens(&p.deps).await.unwrap(), 0);

    assert_eq!(p.run_token_refresh().await, vec![JobRun::Succeeded]);

    let account = p.test.store.find_account(account.id).await.unwrap().unwrap();
    assert_eq!(account.status, AccountStatus::Active);
    assert!(account.last_refreshed_at.is_some());
    assert!(account.token_expires_at.unwrap() > Utc::now() + Duration::days(30));
    assert_eq!(
        p.test.cipher.decrypt(&account.encrypted_access_token).unwrap(),
        format!("{TEST_ACCESS_TOKEN}-refreshed")
    );
    assert_eq!(p.test.platform.refresh_calls(), 1);

    // Fresh token, recently refreshed: nothing due.
    assert_eq!(scan_expiring_tokens(&p.deps).await.unwrap(), 0);
}

#[tokio::test]
async fn healthy_token_is_left_alone() {
    let p = Pipeline::with_account().await;

    assert_eq!(scan_expiring_tokens(&p.deps).await.unwrap(), 0);
    assert!(p.test.jobs.pending(TOKEN_REFRESH_JOB).is_empty());
}

#[tokio::test]
async fn rejected_credential_flags_the_account() {
    let p = Pipeline::new();
    let account = p
        .test
        .seed_account(Utc::now() + Duration::days(1))
        .await
        .unwrap();
    p.test.platform.push_refresh_result(Err(PlatformError::new(
        PlatformErrorKind::Permission,
        "token revoked by user",
    )));
    scan_expiring_tokens(&p.deps).await.unwrap();

    let runs = p.run_token_refresh().await;

    assert_eq!(runs, vec![JobRun::Failed(FailureDisposition::Failed)]);
    let account = p.test.store.find_account(account.id).await.unwrap().unwrap();
    assert_eq!(account.status, AccountStatus::ActionRequired);

    // Flagged accounts are no longer scanned.
    assert_eq!(scan_expiring_tokens(&p.deps).await.unwrap(), 0);
}

#[tokio::test]
async fn transient_failure_is_retried() {
    let p = Pipeline::new();
    let account = p
        .test
        .seed_account(Utc::now() + Duration::days(1))
        .await
        .unwrap();
    p.test.platform.push_refresh_result(Err(PlatformError::new(
        PlatformErrorKind::Network,
        "connection reset",
    )));
    scan_expiring_tokens(&p.deps).await.unwrap();

    let runs = p.run_token_refresh().await;
    assert!(matches!(
        runs.as_slice(),
        [JobRun::Failed(FailureDisposition::RetryScheduled { .. })]
    ));
    let stored = p.test.store.find_account(account.id).await.unwrap().unwrap();
    assert_eq!(stored.status, AccountStatus::Active);
    assert!(stored.last_refreshed_at.is_none());

    p.test.jobs.make_all_due();
    assert_eq!(p.run_token_refresh().await, vec![JobRun::Succeeded]);
    assert_eq!(p.test.platform.refresh_calls(), 2);
}

#[tokio::test]
async fn unreadable_credential_requires_action() {
    let p = Pipeline::new();
    let account = p
        .test
        .seed_account(Utc::now() + Duration::days(1))
        .await
        .unwrap();
    p.test
        .store
        .update_account_token(
            account.id,
            "not-a-sealed-token".to_string(),
            Utc::now() + Duration::days(1),
            Utc::now() - Duration::days(3),
        )
        .await
        .unwrap();

    let outcome = refresh_account_token(account.id, &p.deps).await.unwrap();

    assert!(matches!(outcome, RefreshOutcome::ActionRequired { .. }));
    assert_eq!(p.test.platform.refresh_calls(), 0);
}

#[tokio::test]
async fn disabled_account_is_not_refreshed() {
    let p = Pipeline::new();
    let account = p
        .test
        .seed_account(Utc::now() + Duration::days(1))
        .await
        .unwrap();
    p.test
        .store
        .set_account_status(account.id, AccountStatus::Disabled)
        .await
        .unwrap();

    let outcome = refresh_account_token(account.id, &p.deps).await.unwrap();

    assert_eq!(outcome, RefreshOutcome::NotNeeded);
    assert_eq!(p.test.platform.refresh_calls(), 0);
}

mod common;

use common::{init_logging, open};
use std::time::Duration;
use strata_session::{LocalServer, LockScope, Session, SessionError, SessionState};

const WAIT: Duration = Duration::from_secs(2);

async fn until_reconnected(session: &Session, server: &LocalServer) {
    let mut changes = session.state_changes();
    assert!(server.drop_connection(session.id()));
    loop {
        let change = tokio::time::timeout(WAIT, changes.recv()).await.expect("in time").expect("change");
        if change.current == SessionState::ConnectedActive {
            return;
        }
    }
}

#[tokio::test]
async fn locks_are_exclusive_and_granted_in_request_order() {
    init_logging();
    let server = LocalServer::new();
    let first = open(&server, "first").await;
    let second = open(&server, "second").await;
    let third = open(&server, "third").await;

    let held = first.lock("l", LockScope::UnlockOnSessionLoss).expect("attempt").wait().await.expect("lock");
    assert!(held.is_owned());
    assert_eq!(held.name(), "l");

    let mut second_attempt = second.lock("l", LockScope::UnlockOnSessionLoss).expect("attempt");
    tokio::time::sleep(Duration::from_millis(20)).await;
    let mut third_attempt = third.lock("l", LockScope::UnlockOnSessionLoss).expect("attempt");
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!second_attempt.is_resolved());
    assert!(!third_attempt.is_resolved());

    assert_eq!(held.unlock().await, Ok(true));
    assert!(!held.is_owned());
    assert_eq!(held.unlock().await, Ok(false));

    let next = tokio::time::timeout(WAIT, second_attempt.wait()).await.expect("in time").expect("lock");
    assert!(next.sequence() > held.sequence());
    assert!(!third_attempt.is_resolved());
    next.unlock().await.expect("unlock");
    let last = tokio::time::timeout(WAIT, third_attempt.wait()).await.expect("in time").expect("lock");
    assert!(last.sequence() > next.sequence());
}

#[tokio::test]
async fn relocking_returns_an_equal_lock() {
    init_logging();
    let server = LocalServer::new();
    let session = open(&server, "owner").await;
    let first = session.lock("same", LockScope::UnlockOnSessionLoss).expect("attempt").wait().await.expect("lock");
    let again = session.lock("same", LockScope::UnlockOnSessionLoss).expect("attempt").wait().await.expect("lock");
    assert_eq!(first, again);
    assert_eq!(first.token(), again.token());
}

#[tokio::test]
async fn cancelled_attempts_never_hold_the_lock() {
    init_logging();
    let server = LocalServer::new();
    let owner = open(&server, "owner").await;
    let waiter = open(&server, "waiter").await;
    let after = open(&server, "after").await;

    let held = owner.lock("c", LockScope::UnlockOnSessionLoss).expect("attempt").wait().await.expect("lock");
    let mut cancelled = waiter.lock("c", LockScope::UnlockOnSessionLoss).expect("attempt");
    tokio::time::sleep(Duration::from_millis(20)).await;
    let mut queued = after.lock("c", LockScope::UnlockOnSessionLoss).expect("attempt");
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(cancelled.cancel());
    assert!(!cancelled.cancel());
    assert_eq!(cancelled.wait().await, Err(SessionError::Cancelled));

    held.unlock().await.expect("unlock");
    let granted = tokio::time::timeout(WAIT, queued.wait()).await.expect("in time").expect("lock");
    assert!(granted.is_owned());
}

#[tokio::test]
async fn connection_loss_releases_only_connection_scoped_locks() {
    init_logging();
    let server = LocalServer::new();
    let owner = open(&server, "owner").await;
    let rival = open(&server, "rival").await;

    let connection_scoped =
        owner.lock("conn", LockScope::UnlockOnConnectionLoss).expect("attempt").wait().await.expect("lock");
    let session_scoped = owner.lock("sess", LockScope::UnlockOnSessionLoss).expect("attempt").wait().await.expect("lock");

    until_reconnected(&owner, &server).await;
    assert!(!connection_scoped.is_owned());
    assert!(session_scoped.is_owned());

    let taken = tokio::time::timeout(WAIT, rival.lock("conn", LockScope::UnlockOnSessionLoss).expect("attempt").wait())
        .await
        .expect("in time")
        .expect("lock");
    assert!(taken.is_owned());

    let mut waiting = rival.lock("sess", LockScope::UnlockOnSessionLoss).expect("attempt");
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiting.is_resolved());

    owner.close().await.expect("close");
    assert!(!session_scoped.is_owned());
    let inherited = tokio::time::timeout(WAIT, waiting.wait()).await.expect("in time").expect("lock");
    assert!(inherited.sequence() > session_scoped.sequence());
}

#[tokio::test]
async fn relocking_with_a_narrower_scope_releases_on_connection_loss() {
    init_logging();
    let server = LocalServer::new();
    let owner = open(&server, "owner").await;
    let rival = open(&server, "rival").await;

    let first = owner.lock("l", LockScope::UnlockOnSessionLoss).expect("attempt").wait().await.expect("lock");
    let again = owner.lock("l", LockScope::UnlockOnConnectionLoss).expect("attempt").wait().await.expect("lock");
    assert_eq!(first, again);
    assert_eq!(first.scope(), LockScope::UnlockOnConnectionLoss);

    until_reconnected(&owner, &server).await;
    assert!(!first.is_owned());
    assert!(!again.is_owned());

    let taken = tokio::time::timeout(WAIT, rival.lock("l", LockScope::UnlockOnSessionLoss).expect("attempt").wait())
        .await
        .expect("in time")
        .expect("lock");
    assert!(taken.is_owned());
    assert!(taken.sequence() > first.sequence());
}

#[tokio::test]
async fn cancelling_one_attempt_leaves_sibling_attempts_waiting() {
    init_logging();
    let server = LocalServer::new();
    let owner = open(&server, "owner").await;
    let waiter = open(&server, "waiter").await;

    let held = owner.lock("s", LockScope::UnlockOnSessionLoss).expect("attempt").wait().await.expect("lock");
    let mut cancelled = waiter.lock("s", LockScope::UnlockOnSessionLoss).expect("attempt");
    let mut sibling = waiter.lock("s", LockScope::UnlockOnSessionLoss).expect("attempt");
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(cancelled.cancel());
    assert_eq!(cancelled.wait().await, Err(SessionError::Cancelled));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!sibling.is_resolved());

    held.unlock().await.expect("unlock");
    let granted = tokio::time::timeout(WAIT, sibling.wait()).await.expect("in time").expect("lock");
    assert!(granted.is_owned());
}

#[tokio::test]
async fn closed_sessions_cannot_lock() {
    init_logging();
    let server = LocalServer::new();
    let session = open(&server, "owner").await;
    session.close().await.expect("close");
    assert_eq!(session.lock("x", LockScope::UnlockOnSessionLoss).err(), Some(SessionError::SessionClosed));
}

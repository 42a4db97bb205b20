#![allow(dead_code)]

use std::time::Duration;
use strata_session::{LocalServer, ReconnectionConfig, Session, SessionConfig, StreamEvent};
use tokio::sync::mpsc::UnboundedReceiver;

const EVENT_TIMEOUT: Duration = Duration::from_secs(2);
const QUIET_PERIOD: Duration = Duration::from_millis(50);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn config(principal: &str) -> SessionConfig {
    SessionConfig::default()
        .with_principal(principal)
        .with_reconnection(ReconnectionConfig { enabled: true, max_attempts: 5, delay_ms: 10 })
}

pub async fn open(server: &LocalServer, principal: &str) -> Session {
    server.open_session(config(principal)).await.expect("session opens")
}

pub async fn next<T>(rx: &mut UnboundedReceiver<StreamEvent<T>>) -> StreamEvent<T> {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv()).await.expect("event in time").expect("stream open")
}

/// Asserts nothing more arrives for a short while.
pub async fn assert_quiet<T: std::fmt::Debug>(rx: &mut UnboundedReceiver<StreamEvent<T>>) {
    tokio::time::sleep(QUIET_PERIOD).await;
    if let Ok(event) = rx.try_recv() {
        panic!("unexpected stream event {event:?}");
    }
}

pub async fn next_value<T: std::fmt::Debug>(rx: &mut UnboundedReceiver<StreamEvent<T>>) -> (String, Option<T>, T) {
    match next(rx).await {
        StreamEvent::Value { path, old, new, .. } => (path.to_string(), old, new),
        other => panic!("expected a value, got {other:?}"),
    }
}

pub async fn next_subscription<T: std::fmt::Debug>(rx: &mut UnboundedReceiver<StreamEvent<T>>) -> String {
    match next(rx).await {
        StreamEvent::Subscribed { path, .. } => path.to_string(),
        other => panic!("expected a subscription, got {other:?}"),
    }
}

mod common;

use async_trait::async_trait;
use common::{config, init_logging, open};
use std::time::Duration;
use strata_session::{
    LocalServer, RequestContext, RequestHandler, Responder, ResponseStream, SessionError, SessionId,
};
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, PartialEq)]
enum Lifecycle {
    Request(RequestContext),
    Closed,
    Failed(SessionError),
}

struct Echo {
    label: &'static str,
    events: mpsc::UnboundedSender<Lifecycle>,
}

impl Echo {
    fn new(label: &'static str) -> (Self, mpsc::UnboundedReceiver<Lifecycle>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { label, events }, rx)
    }
}

#[async_trait]
impl RequestHandler<String, String> for Echo {
    async fn on_request(&self, context: RequestContext, request: String, responder: Responder<String>) {
        let _ = self.events.send(Lifecycle::Request(context));
        if request == "refuse" {
            let _ = responder.reject("refused").await;
        } else {
            let _ = responder.respond(format!("{}:{}", self.label, request)).await;
        }
    }

    fn on_close(&self) {
        let _ = self.events.send(Lifecycle::Closed);
    }

    fn on_error(&self, error: &SessionError) {
        let _ = self.events.send(Lifecycle::Failed(error.clone()));
    }
}

#[derive(Debug, PartialEq)]
enum Collected {
    Response(SessionId, String),
    Error(SessionId, SessionError),
    Done,
}

struct Collector(mpsc::UnboundedSender<Collected>);

impl ResponseStream<String> for Collector {
    fn on_response(&mut self, session_id: &SessionId, response: String) {
        let _ = self.0.send(Collected::Response(session_id.clone(), response));
    }

    fn on_response_error(&mut self, session_id: &SessionId, error: &SessionError) {
        let _ = self.0.send(Collected::Error(session_id.clone(), error.clone()));
    }

    fn on_close(&mut self) {
        let _ = self.0.send(Collected::Done);
    }
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv()).await.expect("in time").expect("open")
}

#[tokio::test]
async fn requests_route_to_the_longest_registered_prefix() {
    init_logging();
    let server = LocalServer::new();
    let general = open(&server, "general").await;
    let special = open(&server, "special").await;
    let client = open(&server, "client").await;

    let (echo, mut general_events) = Echo::new("general");
    let _general = general.messaging().add_request_handler("svc", echo).await.expect("register");
    let (echo, _special_events) = Echo::new("special");
    let _special = special.messaging().add_request_handler("svc/special", echo).await.expect("register");

    let messaging = client.messaging();
    let reply: String = messaging.send_request("svc/other", "x".to_string()).await.expect("general reply");
    assert_eq!(reply, "general:x");
    let reply: String = messaging.send_request("svc/special/deep", "y".to_string()).await.expect("special reply");
    assert_eq!(reply, "special:y");
    let reply: String = messaging.send_request("svc", "z".to_string()).await.expect("exact path");
    assert_eq!(reply, "general:z");

    match recv(&mut general_events).await {
        Lifecycle::Request(context) => {
            assert_eq!(&context.session_id, client.id());
            assert_eq!(context.path.as_str(), "svc/other");
            assert_eq!(context.session_properties.get("$Principal").map(String::as_str), Some("client"));
        }
        other => panic!("expected a request, got {other:?}"),
    }
}

#[tokio::test]
async fn unanswerable_requests_fail() {
    init_logging();
    let server = LocalServer::new();
    let responder = open(&server, "responder").await;
    let client = open(&server, "client").await;
    let (echo, _events) = Echo::new("echo");
    let _registration = responder.messaging().add_request_handler("svc", echo).await.expect("register");
    let messaging = client.messaging();

    assert_eq!(
        messaging.send_request::<String, String>("elsewhere", "x".to_string()).await,
        Err(SessionError::NoHandler { path: "elsewhere".into() })
    );
    assert_eq!(
        messaging.send_request::<String, String>("svc", "refuse".to_string()).await,
        Err(SessionError::RequestRejected { reason: "refused".into() })
    );
    assert!(matches!(
        messaging.send_request::<String, i64>("svc", "x".to_string()).await,
        Err(SessionError::IncompatibleValue { .. })
    ));
    assert!(matches!(
        messaging.send_request::<i64, String>("svc", 5).await,
        Err(SessionError::RequestRejected { .. })
    ));
}

#[tokio::test]
async fn requests_can_target_one_session() {
    init_logging();
    let server = LocalServer::new();
    let first = open(&server, "first").await;
    let second = open(&server, "second").await;
    let client = open(&server, "client").await;
    let (echo, _first_events) = Echo::new("first");
    let _one = first.messaging().add_request_handler("svc", echo).await.expect("register");
    let (echo, _second_events) = Echo::new("second");
    let _two = second.messaging().add_request_handler("svc", echo).await.expect("register");

    let messaging = client.messaging();
    let reply: String = messaging.send_request_to_session(second.id(), "svc", "x".to_string()).await.expect("reply");
    assert_eq!(reply, "second:x");
    let reply: String = messaging.send_request_to_session(first.id(), "svc/deeper", "y".to_string()).await.expect("reply");
    assert_eq!(reply, "first:y");

    let unknown = SessionId::new("session-unknown");
    assert_eq!(
        messaging.send_request_to_session::<String, String>(&unknown, "svc", "x".to_string()).await,
        Err(SessionError::NoSuchSession { session_id: "session-unknown".into() })
    );
    assert!(matches!(
        messaging.send_request_to_session::<String, String>(client.id(), "svc", "x".to_string()).await,
        Err(SessionError::NoHandler { .. })
    ));
}

#[tokio::test]
async fn filtered_requests_reach_every_matching_session() {
    init_logging();
    let server = LocalServer::new();
    let mut fx = Vec::new();
    for name in ["fx-1", "fx-2"] {
        let session = server.open_session(config(name).with_property("desk", "fx")).await.expect("open");
        let (echo, events) = Echo::new("fx");
        let registration = session.messaging().add_request_handler("quote", echo).await.expect("register");
        fx.push((session, registration, events));
    }
    let rates = server.open_session(config("rates").with_property("desk", "rates")).await.expect("open");
    let (echo, _rates_events) = Echo::new("rates");
    let _rates_registration = rates.messaging().add_request_handler("quote", echo).await.expect("register");
    let client = open(&server, "client").await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sent = client
        .messaging()
        .send_request_to_filter("desk is 'fx'", "quote", "eurusd".to_string(), Collector(tx))
        .await
        .expect("sent");
    assert_eq!(sent, 2);

    let mut responders = Vec::new();
    for _ in 0..2 {
        match recv(&mut rx).await {
            Collected::Response(session_id, response) => {
                assert_eq!(response, "fx:eurusd");
                responders.push(session_id);
            }
            other => panic!("expected a response, got {other:?}"),
        }
    }
    assert_eq!(recv(&mut rx).await, Collected::Done);
    responders.sort();
    let mut expected: Vec<SessionId> = fx.iter().map(|(session, _, _)| session.id().clone()).collect();
    expected.sort();
    assert_eq!(responders, expected);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sent = client
        .messaging()
        .send_request_to_filter("desk is 'none'", "quote", "x".to_string(), Collector(tx))
        .await
        .expect("sent");
    assert_eq!(sent, 0);
    assert_eq!(recv(&mut rx).await, Collected::Done);

    let (tx, _rx) = mpsc::unbounded_channel();
    assert!(matches!(
        client.messaging().send_request_to_filter("desk is 'fx", "quote", "x".to_string(), Collector(tx)).await,
        Err(SessionError::MisquotedInput { .. })
    ));
}

#[tokio::test]
async fn closing_registrations_and_sessions_closes_handlers() {
    init_logging();
    let server = LocalServer::new();
    let responder = open(&server, "responder").await;
    let client = open(&server, "client").await;

    let (echo, mut events) = Echo::new("echo");
    let registration = responder.messaging().add_request_handler("svc", echo).await.expect("register");
    assert_eq!(registration.path().as_str(), "svc");
    registration.close().await.expect("unregister");
    assert_eq!(recv(&mut events).await, Lifecycle::Closed);
    assert_eq!(
        client.messaging().send_request::<String, String>("svc", "x".to_string()).await,
        Err(SessionError::NoHandler { path: "svc".into() })
    );

    let (echo, mut events) = Echo::new("echo");
    let _registration = responder.messaging().add_request_handler("svc", echo).await.expect("register");
    responder.close().await.expect("close");
    assert_eq!(recv(&mut events).await, Lifecycle::Closed);

    let other = open(&server, "other").await;
    let (echo, mut events) = Echo::new("echo");
    let _registration = other.messaging().add_request_handler("svc", echo).await.expect("register");
    server.close_session(other.id());
    assert_eq!(recv(&mut events).await, Lifecycle::Failed(SessionError::SessionClosed));
    assert_eq!(
        other.messaging().add_request_handler("svc", Echo::new("late").0).await.err(),
        Some(SessionError::SessionClosed)
    );
}

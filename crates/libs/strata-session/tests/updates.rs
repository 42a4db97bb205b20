mod common;

use common::{init_logging, open};
use serde_json::json;
use strata_session::{LocalServer, LockScope, SessionError, TopicCreationResult};
use strata_topics::{ConstraintOperator, Json, TopicSpecification, TopicType, TopicValue, UpdateConstraint};

fn string() -> TopicSpecification {
    TopicSpecification::new(TopicType::String)
}

#[tokio::test]
async fn one_shot_updates_create_and_replace_values() {
    init_logging();
    let server = LocalServer::new();
    let session = open(&server, "writer").await;
    let updates = session.updates();

    assert_eq!(updates.add_topic("o/a", &string()).await, Ok(TopicCreationResult::Created));
    assert_eq!(updates.add_topic("o/a", &string()).await, Ok(TopicCreationResult::Exists));
    assert_eq!(
        updates.add_topic("o/a", &TopicSpecification::new(TopicType::Int64)).await,
        Err(SessionError::IncompatibleExistingTopic { path: "o/a".into() })
    );
    assert_eq!(server.topic_value("o/a"), None);
    assert_eq!(server.topic_specification("o/a"), Some(string()));

    updates.set("o/a", "first".to_string()).await.expect("set");
    assert_eq!(server.topic_value("o/a"), Some(TopicValue::String("first".into())));
    assert_eq!(updates.add_and_set("o/a", &string(), "second".to_string()).await, Ok(TopicCreationResult::Exists));
    assert_eq!(updates.add_and_set("o/b", &string(), "new".to_string()).await, Ok(TopicCreationResult::Created));

    assert!(matches!(updates.set("o/a", 3i64).await, Err(SessionError::IncompatibleTopic { .. })));
    assert!(matches!(
        updates.add_and_set("o/c", &string(), 3i64).await,
        Err(SessionError::InvalidArgument { .. })
    ));
    assert_eq!(updates.set("o/missing", "x".to_string()).await, Err(SessionError::no_such_topic("o/missing")));
}

#[tokio::test]
async fn update_stream_binds_once_and_reports_creation() {
    init_logging();
    let server = LocalServer::new();
    let session = open(&server, "writer").await;
    let stream = session.updates().update_stream_builder().specification(string()).build::<String>("u/a").expect("build");

    assert_eq!(stream.value(), None);
    assert_eq!(stream.set("one".into()).await, Ok(TopicCreationResult::Created));
    assert_eq!(stream.set("two".into()).await, Ok(TopicCreationResult::Exists));
    assert_eq!(stream.value(), Some("two".to_string()));
    assert_eq!(server.topic_value("u/a"), Some(TopicValue::String("two".into())));
    assert!(stream.validate().await.is_ok());
    assert!(stream.is_valid().await);
}

#[tokio::test]
async fn invalidated_stream_fails_locally_without_contacting_the_server() {
    init_logging();
    let server = LocalServer::new();
    let session = open(&server, "writer").await;
    let stream = session.updates().update_stream_builder().build::<String>("u/missing").expect("build");

    assert_eq!(stream.set("x".into()).await, Err(SessionError::no_such_topic("u/missing")));
    assert!(!stream.is_valid().await);

    let operations = server.operation_count();
    assert_eq!(stream.set("y".into()).await, Err(SessionError::InvalidUpdateStream));
    assert_eq!(stream.validate().await, Err(SessionError::InvalidUpdateStream));
    assert_eq!(stream.recover().await, Err(SessionError::InvalidUpdateStream));
    assert_eq!(server.operation_count(), operations);
}

#[tokio::test]
async fn a_newer_stream_supersedes_the_older_one() {
    init_logging();
    let server = LocalServer::new();
    let session = open(&server, "writer").await;
    let builder = session.updates().update_stream_builder().specification(string());
    let older = builder.build::<String>("u/shared").expect("older");
    let newer = builder.build::<String>("u/shared").expect("newer");

    older.set("old".into()).await.expect("older binds");
    newer.set("new".into()).await.expect("newer binds");
    assert_eq!(older.set("late".into()).await, Err(SessionError::InvalidUpdateStream));
    assert!(!older.is_valid().await);
    assert!(newer.set("still".into()).await.is_ok());
    assert_eq!(server.topic_value("u/shared"), Some(TopicValue::String("still".into())));
}

#[tokio::test]
async fn a_stream_that_fails_to_bind_leaves_the_bound_stream_in_place() {
    init_logging();
    let server = LocalServer::new();
    let session = open(&server, "writer").await;
    let builder = session.updates().update_stream_builder().specification(string());
    let older = builder.build::<String>("u/kept").expect("older");
    older.set("old".into()).await.expect("older binds");

    assert!(server.freeze_topic("u/kept"));
    let newer = builder.build::<String>("u/kept").expect("newer");
    assert_eq!(
        newer.set("new".into()).await,
        Err(SessionError::IncompatibleTopicState { path: "u/kept".into() })
    );
    assert!(!newer.is_valid().await);
    assert_eq!(older.validate().await, Ok(()));
    assert!(older.is_valid().await);
    assert_eq!(server.topic_value("u/kept"), Some(TopicValue::String("old".into())));
}

#[tokio::test]
async fn create_capable_stream_reports_an_unusable_existing_topic() {
    init_logging();
    let server = LocalServer::new();
    let session = open(&server, "writer").await;
    session.updates().add_topic("u/number", &TopicSpecification::new(TopicType::Int64)).await.expect("add");

    let stream = session.updates().update_stream_builder().specification(string()).build::<String>("u/number").expect("build");
    assert_eq!(stream.validate().await, Err(SessionError::IncompatibleExistingTopic { path: "u/number".into() }));

    let plain = session.updates().update_stream_builder().build::<String>("u/number").expect("build");
    assert!(matches!(plain.validate().await, Err(SessionError::IncompatibleTopic { .. })));
}

#[tokio::test]
async fn streams_recover_from_retryable_failures() {
    init_logging();
    let server = LocalServer::new();
    let session = open(&server, "writer").await;
    let stream = session.updates().update_stream_builder().specification(string()).build::<String>("u/r").expect("build");
    stream.set("kept".into()).await.expect("bind");

    server.fail_next_update(SessionError::ClusterRepartition);
    assert_eq!(stream.set("lost".into()).await, Err(SessionError::ClusterRepartition));
    assert!(!stream.is_valid().await);

    stream.recover().await.expect("recover");
    assert!(stream.is_valid().await);
    assert_eq!(server.topic_value("u/r"), Some(TopicValue::String("kept".into())));
    assert_eq!(stream.set("after".into()).await, Ok(TopicCreationResult::Exists));
}

#[tokio::test]
async fn building_rejects_unwritable_types_and_mismatched_specifications() {
    init_logging();
    let server = LocalServer::new();
    let session = open(&server, "writer").await;
    let builder = session.updates().update_stream_builder();

    assert!(matches!(
        builder.build::<strata_topics::TimeSeriesEvent>("u/events"),
        Err(SessionError::InvalidArgument { .. })
    ));
    assert!(matches!(
        builder.specification(string()).build::<i64>("u/text"),
        Err(SessionError::InvalidArgument { .. })
    ));
    assert!(builder.specification(string()).reset().build::<i64>("u/text").is_ok());
}

#[tokio::test]
async fn value_constraints_guard_updates() {
    init_logging();
    let server = LocalServer::new();
    let session = open(&server, "writer").await;
    let updates = session.updates();

    let created = updates
        .add_and_set_constrained("c/a", &string(), "v1".to_string(), &UpdateConstraint::no_topic())
        .await;
    assert_eq!(created, Ok(TopicCreationResult::Created));
    assert_eq!(
        updates.add_and_set_constrained("c/a", &string(), "v2".to_string(), &UpdateConstraint::no_topic()).await,
        Err(SessionError::UnsatisfiedConstraint { path: "c/a".into() })
    );

    let expect_v1 = UpdateConstraint::value(ConstraintOperator::Is, TopicValue::String("v1".into()));
    updates.set_constrained("c/a", "v2".to_string(), &expect_v1).await.expect("compare and set");
    assert_eq!(
        updates.set_constrained("c/a", "v3".to_string(), &expect_v1).await,
        Err(SessionError::UnsatisfiedConstraint { path: "c/a".into() })
    );
    assert_eq!(server.topic_value("c/a"), Some(TopicValue::String("v2".into())));

    updates.add_topic("c/empty", &string()).await.expect("add");
    updates.set_constrained("c/empty", "first".to_string(), &UpdateConstraint::no_value()).await.expect("first");
    assert!(updates.set_constrained("c/empty", "again".to_string(), &UpdateConstraint::no_value()).await.is_err());
}

#[tokio::test]
async fn partial_json_constraints_inspect_documents() {
    init_logging();
    let server = LocalServer::new();
    let session = open(&server, "writer").await;
    let updates = session.updates();
    let json = TopicSpecification::new(TopicType::Json);
    updates.add_and_set("c/doc", &json, json!({"state": "open", "owner": null})).await.expect("add");

    let open_and_unowned = UpdateConstraint::json_value()
        .with_value_at("/state", ConstraintOperator::Is, json!("open"))
        .and_then(|partial| partial.with_null_at("/owner"))
        .and_then(|partial| partial.without("/closed_by"))
        .expect("constraint");
    let claim: Json = json!({"state": "open", "owner": "alice"});
    updates.set_constrained("c/doc", claim.clone(), &open_and_unowned.into()).await.expect("claim");

    let again = UpdateConstraint::json_value().with_null_at("/owner").expect("constraint");
    assert_eq!(
        updates.set_constrained("c/doc", claim, &again.into()).await,
        Err(SessionError::UnsatisfiedConstraint { path: "c/doc".into() })
    );
}

#[tokio::test]
async fn lock_constraints_fence_updates_to_the_current_owner() {
    init_logging();
    let server = LocalServer::new();
    let session = open(&server, "writer").await;
    let updates = session.updates();
    updates.add_and_set("c/fenced", &string(), "start".to_string()).await.expect("add");

    let lock = session.lock("fence", LockScope::UnlockOnSessionLoss).expect("attempt").wait().await.expect("lock");
    let fenced = UpdateConstraint::locked(&lock);
    updates.set_constrained("c/fenced", "owned".to_string(), &fenced).await.expect("owner may update");

    assert_eq!(lock.unlock().await, Ok(true));
    assert_eq!(
        updates.set_constrained("c/fenced", "stale".to_string(), &fenced).await,
        Err(SessionError::UnsatisfiedConstraint { path: "c/fenced".into() })
    );

    let either = fenced.or(&UpdateConstraint::value(ConstraintOperator::Eq, TopicValue::String("owned".into())));
    updates.set_constrained("c/fenced", "fallback".to_string(), &either).await.expect("second alternative");
}

#[tokio::test]
async fn server_refusals_surface_as_errors() {
    init_logging();
    let server = LocalServer::new();
    let session = open(&server, "guest").await;
    let updates = session.updates();

    server.set_topic_limit(Some(1));
    updates.add_topic("l/one", &string()).await.expect("first topic");
    assert_eq!(updates.add_topic("l/two", &string()).await, Err(SessionError::TopicLicenseLimit { limit: 1 }));

    assert!(server.freeze_topic("l/one"));
    assert_eq!(
        updates.set("l/one", "x".to_string()).await,
        Err(SessionError::IncompatibleTopicState { path: "l/one".into() })
    );

    server.deny_updates("guest");
    assert!(matches!(updates.remove_topics(">l//").await, Err(SessionError::SessionSecurity { .. })));
}

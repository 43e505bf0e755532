//! Transaction and savepoint state machine.

use std::sync::Arc;

use xdev_client::{Client, ClientSettings, Error, SessionSettings, Value};
use xdev_testing::MockServer;

fn client(server: &MockServer) -> Client {
    let settings = SessionSettings::builder().host("db1").build().unwrap();
    Client::with_connector(ClientSettings::new(settings), Arc::new(server.clone())).unwrap()
}

async fn insert(session: &mut xdev_client::Session, v: i64) {
    session
        .sql("INSERT INTO t VALUES (?)", &[Value::Int(v)])
        .await
        .unwrap();
}

#[tokio::test]
async fn rollback_to_savepoint_invalidates_later_ones() {
    let server = MockServer::new();
    let client = client(&server);
    let mut session = client.get_session().await.unwrap();

    session.start_transaction().await.unwrap();
    insert(&mut session, 1).await;
    session.set_savepoint(Some("s1")).await.unwrap();
    insert(&mut session, 2).await;
    session.set_savepoint(Some("s2")).await.unwrap();
    insert(&mut session, 3).await;
    session.set_savepoint(Some("s3")).await.unwrap();

    session.rollback_to("s1").await.unwrap();

    // s2 and s3 no longer exist; s1 itself survives.
    assert!(matches!(
        session.rollback_to("s3").await,
        Err(Error::TransactionState(_))
    ));
    assert!(matches!(
        session.release_savepoint("s2").await,
        Err(Error::TransactionState(_))
    ));
    session.rollback_to("s1").await.unwrap();

    session.commit().await.unwrap();
    assert_eq!(server.committed_rows(), vec![1]);
    client.close().await;
}

#[tokio::test]
async fn reusing_a_savepoint_name_moves_it() {
    let server = MockServer::new();
    let client = client(&server);
    let mut session = client.get_session().await.unwrap();

    session.start_transaction().await.unwrap();
    insert(&mut session, 1).await;
    session.set_savepoint(Some("sp")).await.unwrap();
    insert(&mut session, 2).await;
    session.set_savepoint(Some("sp")).await.unwrap();
    insert(&mut session, 3).await;

    session.rollback_to("sp").await.unwrap();
    session.commit().await.unwrap();
    assert_eq!(server.committed_rows(), vec![1, 2]);
    client.close().await;
}

#[tokio::test]
async fn generated_names_are_distinct() {
    let server = MockServer::new();
    let client = client(&server);
    let mut session = client.get_session().await.unwrap();

    session.start_transaction().await.unwrap();
    let a = session.set_savepoint(None).await.unwrap();
    let b = session.set_savepoint(None).await.unwrap();
    assert_ne!(a, b);
    session.rollback().await.unwrap();
    client.close().await;
}

#[tokio::test]
async fn savepoints_require_a_transaction() {
    let server = MockServer::new();
    let client = client(&server);
    let mut session = client.get_session().await.unwrap();

    assert!(matches!(
        session.set_savepoint(None).await,
        Err(Error::TransactionState(_))
    ));
    assert!(matches!(
        session.release_savepoint("sp").await,
        Err(Error::TransactionState(_))
    ));
    assert!(matches!(
        session.rollback_to("sp").await,
        Err(Error::TransactionState(_))
    ));
    client.close().await;
}

#[tokio::test]
async fn invalid_savepoint_name_rejected() {
    let server = MockServer::new();
    let client = client(&server);
    let mut session = client.get_session().await.unwrap();

    session.start_transaction().await.unwrap();
    assert!(matches!(
        session.set_savepoint(Some("bad name; DROP")).await,
        Err(Error::TransactionState(_))
    ));
    session.rollback().await.unwrap();
    client.close().await;
}

#[tokio::test]
async fn released_savepoint_keeps_changes() {
    let server = MockServer::new();
    let client = client(&server);
    let mut session = client.get_session().await.unwrap();

    session.start_transaction().await.unwrap();
    insert(&mut session, 1).await;
    session.set_savepoint(Some("sp")).await.unwrap();
    insert(&mut session, 2).await;
    session.release_savepoint("sp").await.unwrap();
    session.commit().await.unwrap();
    assert_eq!(server.committed_rows(), vec![1, 2]);
    client.close().await;
}

#[tokio::test]
async fn nested_transactions_rejected_and_idle_commit_is_a_noop() {
    let server = MockServer::new();
    let client = client(&server);
    let mut session = client.get_session().await.unwrap();

    // Commit and rollback outside a transaction do nothing.
    session.commit().await.unwrap();
    session.rollback().await.unwrap();

    session.start_transaction().await.unwrap();
    assert!(matches!(
        session.start_transaction().await,
        Err(Error::TransactionState(_))
    ));
    assert!(session.in_transaction());
    session.rollback().await.unwrap();
    assert!(!session.in_transaction());
    client.close().await;
}

//! The execute / prepare+execute / execute-prepared ladder and the
//! copy-on-write statement shapes driving it.

use std::sync::Arc;

use xdev_client::{Client, ClientSettings, Find, SessionSettings};
use xdev_testing::MockServer;

fn client(server: &MockServer) -> Client {
    let settings = SessionSettings::builder().host("db1").build().unwrap();
    Client::with_connector(ClientSettings::new(settings), Arc::new(server.clone())).unwrap()
}

#[tokio::test]
async fn second_execution_prepares_the_statement() {
    let server = MockServer::new();
    let client = client(&server);
    let mut session = client.get_session().await.unwrap();

    let find = Find::new("app.users").criteria("age > :age").bind("age", 30);
    for _ in 0..3 {
        find.execute(&mut session).await.unwrap();
    }

    assert_eq!(server.execute_calls(), 1);
    assert_eq!(server.prepare_calls(), 1);
    assert_eq!(server.execute_prepared_calls(), 2);
    assert_eq!(server.prepared_created(), 1);
    client.close().await;
}

#[tokio::test]
async fn handles_differing_only_in_binds_share_one_prepared_statement() {
    let server = MockServer::new();
    let client = client(&server);
    let mut session = client.get_session().await.unwrap();

    let base = Find::new("app.users").criteria("age > :age");
    let young = base.clone().bind("age", 18);
    let old = base.clone().bind("age", 65);

    young.execute(&mut session).await.unwrap();
    old.execute(&mut session).await.unwrap();
    old.execute(&mut session).await.unwrap();

    assert_eq!(server.prepared_created(), 1);
    assert_eq!(server.execute_prepared_calls(), 2);
    client.close().await;
}

#[tokio::test]
async fn structural_change_gets_its_own_prepared_statement() {
    let server = MockServer::new();
    let client = client(&server);
    let mut session = client.get_session().await.unwrap();

    let base = Find::new("app.users").criteria("age > :age").bind("age", 30);
    base.execute(&mut session).await.unwrap();
    base.execute(&mut session).await.unwrap();
    assert_eq!(server.prepared_created(), 1);

    let sorted = base.clone().sort(["age DESC"]);
    sorted.execute(&mut session).await.unwrap();
    sorted.execute(&mut session).await.unwrap();
    assert_eq!(server.prepared_created(), 2);

    // The original shape still runs against its cached id.
    base.execute(&mut session).await.unwrap();
    assert_eq!(server.prepared_created(), 2);
    assert_eq!(server.prepare_calls(), 2);
    client.close().await;
}

#[tokio::test]
async fn statement_limit_degrades_to_direct_execution() {
    let server = MockServer::new();
    server.set_max_prepared(0);
    let client = client(&server);
    let mut session = client.get_session().await.unwrap();

    let find = Find::new("app.users").criteria("age > :age").bind("age", 30);
    for _ in 0..3 {
        find.execute(&mut session).await.unwrap();
    }

    // One refused prepare, then every execution takes the direct path.
    assert_eq!(server.prepare_calls(), 1);
    assert_eq!(server.prepared_created(), 0);
    assert_eq!(server.execute_calls(), 3);
    client.close().await;
}

#[tokio::test]
async fn cache_travels_with_the_pooled_connection() {
    let server = MockServer::new();
    let client = client(&server);
    let find = Find::new("app.users").criteria("age > :age").bind("age", 30);

    let mut session = client.get_session().await.unwrap();
    find.execute(&mut session).await.unwrap();
    find.execute(&mut session).await.unwrap();
    assert_eq!(server.prepare_calls(), 1);
    session.close().await;

    // A new session over the same physical connection reuses the id.
    let mut session = client.get_session().await.unwrap();
    find.execute(&mut session).await.unwrap();
    assert_eq!(server.connections_opened(), 1);
    assert_eq!(server.prepare_calls(), 1);
    assert_eq!(server.execute_prepared_calls(), 2);
    client.close().await;
}

#[tokio::test]
async fn raw_sql_is_never_prepared() {
    let server = MockServer::new();
    let client = client(&server);
    let mut session = client.get_session().await.unwrap();

    for _ in 0..4 {
        session.sql("SELECT * FROM t", &[]).await.unwrap();
    }
    assert_eq!(server.prepare_calls(), 0);
    assert_eq!(server.execute_calls(), 4);
    client.close().await;
}

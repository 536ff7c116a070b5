//! End-to-end tests for resource CRUD through the HTTP surface.

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use resbus_storage::MemoryResourceStore;

use common::{create_test_app, send, send_with_content_type, BASE_PATH};

#[tokio::test]
async fn test_put_then_get_item() {
    let store = Arc::new(MemoryResourceStore::new());
    let app = create_test_app(&store);

    let uri = format!("{BASE_PATH}/path/res");
    let (status, _, body) = send_with_content_type(
        app.clone(),
        "PUT",
        &uri,
        Some("text/plain"),
        b"some data",
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body.contains("Put some data!"));

    let (status, headers, body) = send(app, "GET", &uri, b"").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "some data");
    assert_eq!(headers.get("content-type").unwrap(), "text/plain");
}

#[tokio::test]
async fn test_put_creates_missing_ancestors_as_collections() {
    let store = Arc::new(MemoryResourceStore::new());
    let app = create_test_app(&store);

    let (status, _, _) = send(
        app.clone(),
        "PUT",
        &format!("{BASE_PATH}/a/b/c"),
        b"payload",
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // The intermediate resource is a collection listing its child.
    let (status, _, body) = send(app, "GET", &format!("{BASE_PATH}/a/b"), b"").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"["c"]"#);
}

#[tokio::test]
async fn test_put_without_body_creates_collection() {
    let store = Arc::new(MemoryResourceStore::new());
    let app = create_test_app(&store);

    let uri = format!("{BASE_PATH}/a/coll");
    let (status, _, _) = send(app.clone(), "PUT", &uri, b"").await;
    assert_eq!(status, StatusCode::CREATED);

    // Writing a value onto an existing collection conflicts.
    let (status, _, _) = send(app.clone(), "PUT", &uri, b"x").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _, body) = send(app, "GET", &uri, b"").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "[]");
}

#[tokio::test]
async fn test_post_to_collection_creates_numbered_children() {
    let store = Arc::new(MemoryResourceStore::new());
    let app = create_test_app(&store);

    let uri = format!("{BASE_PATH}/path/res");
    send(app.clone(), "PUT", &uri, b"").await;

    let (status, headers, body) = send(app.clone(), "POST", &uri, b"some data").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(
        headers.get("location").unwrap(),
        &format!("{BASE_PATH}/path/res/0")
    );
    assert!(body.contains("201 Resource Created"));

    let (status, _, body) = send(app.clone(), "GET", &uri, b"").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"["0"]"#);

    // The created child is an item holding the payload.
    let (status, _, body) = send(app, "GET", &format!("{uri}/0"), b"").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "some data");
}

#[tokio::test]
async fn test_post_to_item_conflicts() {
    let store = Arc::new(MemoryResourceStore::new());
    let app = create_test_app(&store);

    let uri = format!("{BASE_PATH}/item");
    send(app.clone(), "PUT", &uri, b"data").await;

    let (status, _, _) = send(app, "POST", &uri, b"more").await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_post_to_missing_resource_is_not_found() {
    let store = Arc::new(MemoryResourceStore::new());
    let app = create_test_app(&store);

    let (status, _, _) = send(
        app,
        "POST",
        &format!("{BASE_PATH}/uwld/ere/i"),
        b"some data",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_is_leaf_only() {
    let store = Arc::new(MemoryResourceStore::new());
    let app = create_test_app(&store);

    send(app.clone(), "PUT", &format!("{BASE_PATH}/path/res"), b"x").await;

    // Non-leaf delete conflicts and leaves the tree unchanged.
    let (status, _, _) = send(app.clone(), "DELETE", &format!("{BASE_PATH}/path"), b"").await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _, _) = send(app.clone(), "GET", &format!("{BASE_PATH}/path/res"), b"").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, body) =
        send(app.clone(), "DELETE", &format!("{BASE_PATH}/path/res"), b"").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Item deleted!"));

    let (status, _, _) = send(app.clone(), "DELETE", &format!("{BASE_PATH}/path"), b"").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(app, "GET", &format!("{BASE_PATH}/path"), b"").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_put_updates_existing_item() {
    let store = Arc::new(MemoryResourceStore::new());
    let app = create_test_app(&store);

    let uri = format!("{BASE_PATH}/item");
    send(app.clone(), "PUT", &uri, b"old").await;

    let (status, _, _) = send(app.clone(), "PUT", &uri, b"new").await;
    assert_eq!(status, StatusCode::OK);

    // Read-after-write observes the new value.
    let (_, _, body) = send(app, "GET", &uri, b"").await;
    assert_eq!(body, "new");
}

#[tokio::test]
async fn test_child_names_survive_deletes() {
    let store = Arc::new(MemoryResourceStore::new());
    let app = create_test_app(&store);

    let uri = format!("{BASE_PATH}/coll");
    send(app.clone(), "PUT", &uri, b"").await;
    send(app.clone(), "POST", &uri, b"a").await;
    send(app.clone(), "POST", &uri, b"b").await;
    send(app.clone(), "DELETE", &format!("{uri}/1"), b"").await;

    // The next child gets a fresh name, "1" is never reused.
    let (_, headers, _) = send(app.clone(), "POST", &uri, b"c").await;
    assert_eq!(headers.get("location").unwrap(), &format!("{uri}/2"));
}

#[tokio::test]
async fn test_delete_on_missing_resource_is_not_found() {
    let store = Arc::new(MemoryResourceStore::new());
    let app = create_test_app(&store);

    let (status, _, _) = send(app, "DELETE", &format!("{BASE_PATH}/ghost"), b"").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_plain_response_convention() {
    let store = Arc::new(MemoryResourceStore::new());
    let app = create_test_app(&store);

    let uri = format!("{BASE_PATH}/nope");
    let (status, _, body) = send(app, "GET", &uri, b"").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.starts_with("404: "));
    assert!(body.contains(&format!("Request URL: {uri}")));
}

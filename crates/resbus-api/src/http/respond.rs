//! Response conventions of the bus.
//!
//! Plain responses carry `"<code>: <message>\nRequest URL: <url>\n"`;
//! created responses point at the new resource via `Location`.

use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};

use resbus_storage::StorageError;

/// Builds a plain text response in the bus convention.
pub fn plain(status: StatusCode, msg: &str, uri: &Uri) -> Response {
    let body = format!("{}: {}\nRequest URL: {}\n", status.as_u16(), msg, uri);
    (status, body).into_response()
}

/// Responds 201 with `Location` pointing at the newly created id under
/// the request URL.
pub fn created(uri: &Uri, id: &str) -> Response {
    let base = uri.path().trim_end_matches('/');
    let location = format!("{base}/{id}");
    let body = format!("201 Resource Created {location}!");
    (
        StatusCode::CREATED,
        [(header::LOCATION, location.clone())],
        body,
    )
        .into_response()
}

/// Responds with a JSON body.
pub fn json(value: &impl serde::Serialize, uri: &Uri) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(err) => plain(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("Could not encode response: {err}"),
            uri,
        ),
    }
}

/// Maps a storage error onto its HTTP status.
pub fn status_for(err: &StorageError) -> StatusCode {
    match err {
        StorageError::NotFound { .. } | StorageError::HookNotFound { .. } => StatusCode::NOT_FOUND,
        StorageError::InvalidPath { .. } => StatusCode::BAD_REQUEST,
        StorageError::AlreadyExists { .. }
        | StorageError::HasChildren { .. }
        | StorageError::NotAnItem { .. }
        | StorageError::NotACollection { .. } => StatusCode::CONFLICT,
        StorageError::RootProtected => StatusCode::METHOD_NOT_ALLOWED,
        StorageError::InvalidHook { .. }
        | StorageError::InvalidForward { .. }
        | StorageError::LockFailed { .. }
        | StorageError::Backend { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Renders a storage error as a plain response.
pub fn storage_error(err: &StorageError, uri: &Uri) -> Response {
    let status = status_for(err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "storage error");
    }
    plain(status, &err.to_string(), uri)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_plain_response_format() {
        let uri: Uri = "/a/b?q=1".parse().unwrap();
        let response = plain(StatusCode::NOT_FOUND, "Not Found", &uri);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_string(response).await,
            "404: Not Found\nRequest URL: /a/b?q=1\n"
        );
    }

    #[tokio::test]
    async fn test_created_sets_location() {
        let uri: Uri = "/path/res".parse().unwrap();
        let response = created(&uri, "0");
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/path/res/0"
        );
        assert_eq!(
            body_string(response).await,
            "201 Resource Created /path/res/0!"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&StorageError::NotFound { key: "k".into() }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&StorageError::InvalidPath { name: "_hooks".into() }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&StorageError::HasChildren { key: "k".into() }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&StorageError::NotACollection { key: "k".into() }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&StorageError::InvalidHook { message: "m".into() }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

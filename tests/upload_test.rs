mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{body_json, multipart_body, multipart_content_type, staged_names, test_app};
use serde_json::json;
use tower::ServiceExt;

fn upload_request(parts: &[(&str, &str, &[u8])]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload-file")
        .header("Content-Type", multipart_content_type())
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

#[tokio::test]
async fn test_upload_rejects_disallowed_extension() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = test_app(dir.path());

    let response = app
        .oneshot(upload_request(&[
            ("files", "a.png", b"png bytes"),
            ("files", "b.txt", b"text bytes"),
        ]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(
        json,
        json!({
            "message": "Upload successful. Previous files were removed.",
            "saved_files": ["a.png"],
            "errors": [{"b.txt": "File type not allowed"}]
        })
    );
    assert_eq!(staged_names(dir.path()), vec!["a.png"]);
    assert_eq!(std::fs::read(dir.path().join("a.png")).unwrap(), b"png bytes");
}

#[tokio::test]
async fn test_upload_replaces_previous_batch() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = test_app(dir.path());

    let response = app
        .clone()
        .oneshot(upload_request(&[
            ("files", "old.png", b"old"),
            ("files", "older.gif", b"older"),
        ]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(staged_names(dir.path()), vec!["old.png", "older.gif"]);

    let response = app
        .oneshot(upload_request(&[("files", "new.JPG", b"new")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["saved_files"], json!(["new.JPG"]));
    assert!(json.get("errors").is_none());
    assert_eq!(staged_names(dir.path()), vec!["new.JPG"]);
}

#[tokio::test]
async fn test_upload_same_batch_twice() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = test_app(dir.path());
    let parts: &[(&str, &str, &[u8])] = &[
        ("files", "scan.png", b"first"),
        ("files", "receipt.jpeg", b"second"),
    ];

    let first = body_json(app.clone().oneshot(upload_request(parts)).await.unwrap()).await;
    let after_first = staged_names(dir.path());

    let second = body_json(app.oneshot(upload_request(parts)).await.unwrap()).await;
    let after_second = staged_names(dir.path());

    assert_eq!(first, second);
    assert_eq!(after_first, after_second);
    assert_eq!(after_second, vec!["receipt.jpeg", "scan.png"]);
}

#[tokio::test]
async fn test_upload_sanitizes_filenames() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = test_app(dir.path());

    let response = app
        .oneshot(upload_request(&[("files", "../my scan.png", b"data")]))
        .await
        .unwrap();

    let json = body_json(response).await;
    assert_eq!(json["saved_files"], json!(["my_scan.png"]));
    assert_eq!(staged_names(dir.path()), vec!["my_scan.png"]);
}

#[tokio::test]
async fn test_upload_without_files_field_keeps_previous_batch() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("keep.png"), b"keep").unwrap();
    let (app, _) = test_app(dir.path());

    let response = app
        .oneshot(upload_request(&[("images", "a.png", b"data")]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await, json!({"error": "No files provided"}));
    assert_eq!(staged_names(dir.path()), vec!["keep.png"]);
}

#[tokio::test]
async fn test_upload_with_empty_selection() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("keep.png"), b"keep").unwrap();
    let (app, _) = test_app(dir.path());

    let response = app
        .oneshot(upload_request(&[("files", "", b"")]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await, json!({"error": "No selected files"}));
    assert_eq!(staged_names(dir.path()), vec!["keep.png"]);
}

#[tokio::test]
async fn test_upload_creates_missing_staging_folder() {
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("uploads");
    let (app, _) = test_app(&staging);

    let response = app
        .oneshot(upload_request(&[("files", "a.bmp", b"bmp")]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(staged_names(&staging), vec!["a.bmp"]);
}

#[tokio::test]
async fn test_upload_usage_document() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = test_app(dir.path());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/upload-file")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["description"], "File upload endpoint");
    assert_eq!(json["methods"], json!(["POST", "GET"]));
    assert!(json["POST"]["parameters"]["files"].is_string());
}

#[tokio::test]
async fn test_index_health_and_request_id() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.png"), b"a").unwrap();
    let (app, _) = test_app(dir.path());

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "req-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "req-42");

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["staging_status"], "ready");
    assert_eq!(json["staged_files"], 1);
    assert_eq!(json["model"], "scripted");
}

#[tokio::test]
async fn test_health_reports_missing_staging_folder() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = test_app(&dir.path().join("not-created"));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["staging_status"], "missing");
    assert_eq!(json["staged_files"], 0);
    assert!(json.get("staging_dir").is_none());
}

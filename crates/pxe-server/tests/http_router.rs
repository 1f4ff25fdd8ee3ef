//! HTTP responder routing, driven in-process with `oneshot`

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use common::seeded_store;
use provisioning_store::MockStore;
use pxe_server::artifacts::ArtifactService;
use pxe_server::cache::{HostCache, ProfileCache, HOST_CACHE_TTL, PROFILE_CACHE_TTL};
use pxe_server::config::ProfileDefaults;
use pxe_server::http::{router, HttpState};
use pxe_server::installer::TemplateDefaults;
use pxe_server::overrides::OverrideRegistry;
use pxe_server::resolver::ProfileResolver;
use pxe_server::template::TemplateRenderer;
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;

fn app(store: MockStore, root: &Path, default_image: &str) -> Router {
    let defaults = ProfileDefaults {
        image_name: default_image.to_string(),
        ..Default::default()
    };
    let shared = Arc::new(store);
    let resolver = ProfileResolver::new(
        Arc::new(HostCache::new(shared.clone(), HOST_CACHE_TTL)),
        Arc::new(ProfileCache::new(shared.clone(), PROFILE_CACHE_TTL)),
        Arc::new(OverrideRegistry::new(defaults.clone(), shared.clone())),
        defaults,
    );
    let renderer = TemplateRenderer::new(None, "http://10.0.0.1:8069", Vec::new(), TemplateDefaults::default());
    let artifacts = ArtifactService::new(Arc::new(resolver), shared, Arc::new(renderer));
    router(Arc::new(HttpState {
        artifacts: Arc::new(artifacts),
        root: root.to_path_buf(),
    }))
}

async fn call(app: Router, method: Method, uri: &str) -> (StatusCode, Vec<u8>) {
    let request = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_rendered_profile_files() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(seeded_store(), dir.path(), "");

    let (status, body) = call(app.clone(), Method::GET, "/profiles/10-0-0-5/cloud-init/meta-data").await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("instance-id: laas-10-0-0-5"));

    let (status, body) = call(app.clone(), Method::GET, "/profiles/10-0-0-5/cloud-init/user-data").await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().starts_with("#cloud-config"));

    let (status, body) = call(app.clone(), Method::GET, "/profiles/10-0-0-5/cloud-init/vendor-data").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"#cloud-config\n{}");

    let (status, _) = call(app.clone(), Method::GET, "/profiles/10-0-0-5/cloud-init/network-config").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The prefix is not case-sensitive
    let (status, body) = call(app, Method::GET, "/PROFILES/10-0-0-5/cloud-init/meta-data").await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("instance-id: laas-10-0-0-5"));
}

#[tokio::test]
async fn test_unknown_slug_without_default_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(seeded_store(), dir.path(), "");
    let (status, _) = call(app, Method::GET, "/profiles/10-9-9-9/cloud-init/user-data").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_static_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("artifacts/ubuntu")).unwrap();
    std::fs::write(dir.path().join("artifacts/ubuntu/vmlinuz"), b"kernel").unwrap();
    let app = app(seeded_store(), dir.path(), "");

    let (status, body) = call(app.clone(), Method::GET, "/artifacts/ubuntu/vmlinuz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"kernel");

    let (status, _) = call(app.clone(), Method::GET, "/artifacts/ubuntu/initrd").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Directories and the root are not listed
    let (status, _) = call(app.clone(), Method::GET, "/artifacts/ubuntu").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(app.clone(), Method::GET, "/").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Traversal is clamped to the root
    let (status, body) = call(app.clone(), Method::GET, "/../artifacts/ubuntu/vmlinuz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"kernel");

    let (status, _) = call(app, Method::POST, "/artifacts/ubuntu/vmlinuz").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_static_range_and_head() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("artifacts/ubuntu")).unwrap();
    std::fs::write(dir.path().join("artifacts/ubuntu/initrd"), b"0123456789").unwrap();
    let app = app(seeded_store(), dir.path(), "");

    let request = Request::builder()
        .uri("/artifacts/ubuntu/initrd")
        .header(header::RANGE, "bytes=2-5")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 2-5/10");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"2345");

    let request = Request::builder()
        .method(Method::HEAD)
        .uri("/artifacts/ubuntu/initrd")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "10");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(body.is_empty());
}

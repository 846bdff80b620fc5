//! Local emulation against the in-memory runtime

use sntl_core::catalog::Catalog;
use sntl_core::{Driver, Error, InlinePolicy};
use sntl_local::{LocalDriver, LocalOptions};
use sntl_test::{FakeRuntime, TestPlane, POLICY_TEMPLATE};
use std::sync::Arc;

const GATEWAY_IMAGE: &str = "ghcr.io/wheegee/sentential-gw:latest";

struct Setup {
    plane: TestPlane,
    runtime: Arc<FakeRuntime>,
    driver: LocalDriver,
}

fn setup() -> Setup {
    let plane = TestPlane::new();
    let runtime = Arc::new(FakeRuntime::new());
    runtime.add_image("sha256:c1", &["app:v1"], &[]);
    runtime.add_image("sha256:c2", &["app:v2", "app:latest"], &["reg/app@sha256:m2"]);
    runtime.add_image("sha256:gw", &[GATEWAY_IMAGE], &[]);

    let driver = LocalDriver::new(
        plane.ontology(),
        plane.control_plane(),
        runtime.clone(),
        Arc::new(InlinePolicy(POLICY_TEMPLATE.to_string())),
    );
    Setup {
        plane,
        runtime,
        driver,
    }
}

#[tokio::test]
async fn test_deploy_without_gateway() {
    let Setup {
        plane,
        runtime,
        driver,
    } = setup();
    let image = driver.image("v1").await.unwrap();

    let url = driver.deploy(&image, false).await.unwrap();
    assert_eq!(url, "http://localhost:9000");
    assert_eq!(runtime.container_names(), vec!["sentential"]);
    assert_eq!(runtime.networks(), vec!["sentential-bridge"]);

    let container = runtime.container("sentential").unwrap();
    assert_eq!(container.spec.image, "app:v1");
    assert_eq!(container.spec.network, "sentential-bridge");
    assert_eq!(container.spec.ports, vec![(9000, 8080)]);
    assert_eq!(container.env("AWS_REGION"), Some("us-east-1"));
    assert_eq!(container.env("PARTITION"), Some("/dev/app/env/"));
    assert!(container.env("AWS_ACCESS_KEY_ID").is_some());
    assert!(container.env("AWS_SESSION_TOKEN").is_some());

    let requests = plane.tokens.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].name, "app-spec-policy");
    assert!(requests[0].policy.contains("parameter/dev/app/*"));
}

#[tokio::test]
async fn test_deploy_with_gateway() {
    let Setup {
        runtime, driver, ..
    } = setup();
    let image = driver.image("v2").await.unwrap();

    let url = driver.deploy(&image, true).await.unwrap();
    assert_eq!(url, "http://localhost:8081");
    assert_eq!(runtime.container_names(), vec!["sentential", "sentential-gw"]);

    let gateway = runtime.container("sentential-gw").unwrap();
    assert_eq!(gateway.env("LAMBDA_ENDPOINT"), Some("http://sentential:8080"));
    assert_eq!(gateway.spec.ports, vec![(8081, 8081)]);
    assert_eq!(gateway.spec.network, "sentential-bridge");
}

#[tokio::test]
async fn test_redeploy_replaces_previous_instance() {
    let Setup {
        plane,
        runtime,
        driver,
    } = setup();

    driver.deploy(&driver.image("v1").await.unwrap(), true).await.unwrap();
    driver.deploy(&driver.image("v2").await.unwrap(), false).await.unwrap();

    assert_eq!(runtime.container_names(), vec!["sentential"]);
    assert_eq!(runtime.container("sentential").unwrap().spec.image, "app:v2");
    assert_eq!(runtime.networks().len(), 1);
    assert_eq!(plane.tokens.requests().len(), 2);
}

#[tokio::test]
async fn test_deployed_resolves_image() {
    let Setup { driver, .. } = setup();
    let image = driver.image("v2").await.unwrap();
    driver.deploy(&image, true).await.unwrap();

    let deployed = driver.deployed().await.unwrap();
    assert_eq!(deployed.image.id, "sha256:c2");
    assert_eq!(deployed.image.digest.as_deref(), Some("sha256:m2"));
    assert_eq!(deployed.name, "dev-us-east-1-app");
    assert_eq!(deployed.public_url.as_deref(), Some("http://localhost:8081"));
}

#[tokio::test]
async fn test_deployed_without_gateway() {
    let Setup { driver, .. } = setup();
    let image = driver.image("v2").await.unwrap();
    let url = driver.deploy(&image, false).await.unwrap();
    assert_eq!(url, "http://localhost:9000");

    let deployed = driver.deployed().await.unwrap();
    assert_eq!(deployed.image.id, "sha256:c2");
    assert!(deployed.public_url.is_none());
}

#[tokio::test]
async fn test_deployed_drops_url_after_private_redeploy() {
    let Setup { driver, .. } = setup();
    let image = driver.image("v1").await.unwrap();

    driver.deploy(&image, true).await.unwrap();
    assert!(driver.deployed().await.unwrap().public_url.is_some());

    driver.deploy(&image, false).await.unwrap();
    assert!(driver.deployed().await.unwrap().public_url.is_none());
}

#[tokio::test]
async fn test_deployed_nothing_running() {
    let Setup { driver, .. } = setup();
    assert!(matches!(driver.deployed().await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_destroy_is_idempotent() {
    let Setup {
        runtime, driver, ..
    } = setup();
    driver.deploy(&driver.image("v1").await.unwrap(), true).await.unwrap();

    driver.destroy().await.unwrap();
    assert!(runtime.container_names().is_empty());
    assert!(runtime.networks().is_empty());

    driver.destroy().await.unwrap();
}

#[tokio::test]
async fn test_custom_options() {
    let plane = TestPlane::new();
    let runtime = Arc::new(FakeRuntime::new());
    runtime.add_image("sha256:c1", &["app:v1"], &[]);
    let driver = LocalDriver::new(
        plane.ontology(),
        plane.control_plane(),
        runtime.clone(),
        Arc::new(InlinePolicy(POLICY_TEMPLATE.to_string())),
    )
    .with_options(LocalOptions {
        network: "sntl-test-net".to_string(),
        function_port: 9100,
        ..LocalOptions::default()
    });

    let url = driver.deploy(&driver.image("v1").await.unwrap(), false).await.unwrap();
    assert_eq!(url, "http://localhost:9100");
    assert_eq!(runtime.networks(), vec!["sntl-test-net"]);
}

#[tokio::test]
async fn test_logs_stream() {
    let Setup {
        runtime, driver, ..
    } = setup();
    driver.deploy(&driver.image("v1").await.unwrap(), false).await.unwrap();
    runtime.write_log("sentential", "START RequestId: 1\n");
    runtime.write_log("sentential", "END RequestId: 1\n");

    let mut out = Vec::new();
    driver.tail(false, &mut out).await.unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "START RequestId: 1\nEND RequestId: 1\n"
    );
    driver.logs(false).await.unwrap();
}

#[tokio::test]
async fn test_logs_without_container() {
    let Setup { driver, .. } = setup();
    assert!(driver.logs(false).await.is_err());
}

//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::time::Duration;

use toolwire_mcp::{McpClientSettings, McpService, ServerRegistry, ServerSpec};

pub const STUB: &str = env!("CARGO_BIN_EXE_toolwire-stub-provider");

/// Spec running the stub provider in `mode`.
pub fn stub_spec(name: &str, mode: &str) -> ServerSpec {
    ServerSpec::new(name, STUB).with_env("STUB_MODE", mode)
}

/// Short timeouts so failure paths finish quickly.
pub fn fast_settings() -> McpClientSettings {
    McpClientSettings {
        request_timeout_ms: 5_000,
        discovery_timeout_ms: 1_000,
        stop_grace_period_ms: 1_000,
        shutdown_deadline_ms: 5_000,
        ..McpClientSettings::default()
    }
}

pub fn service_with(specs: Vec<ServerSpec>) -> McpService {
    service_with_settings(specs, fast_settings())
}

pub fn service_with_settings(specs: Vec<ServerSpec>, settings: McpClientSettings) -> McpService {
    let registry = ServerRegistry::from_specs(specs).expect("valid test registry");
    McpService::new(registry, settings).expect("valid test settings")
}

/// Poll `check` until it holds or `limit` elapses.
pub async fn wait_until<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check().await
}

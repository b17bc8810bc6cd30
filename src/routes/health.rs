//! Health and version endpoints

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::registry::RegistryStatsSnapshot;
use crate::server::http::{json_response, AppState};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always true while the process answers
    pub healthy: bool,
    pub version: &'static str,
    /// Git commit hash (short)
    pub commit: &'static str,
    pub server_id: String,
    /// Seconds since startup
    pub uptime: u64,
    /// Open WebSocket sessions
    pub sessions: usize,
    pub handles: RegistryStatsSnapshot,
    /// Registered provider ids, in directory order
    pub providers: Vec<String>,
}

pub fn build_health_response(state: &AppState) -> HealthResponse {
    HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        server_id: state.args.server_id.to_string(),
        uptime: state.started_at.elapsed().as_secs(),
        sessions: state.session_count(),
        handles: state.registry.stats(),
        providers: state.directory.ids(),
    }
}

/// Handle liveness probe (/health, /healthz)
pub fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    let body = serde_json::to_string(&build_health_response(state))
        .unwrap_or_else(|_| r#"{"healthy":true,"error":"Serialization failed"}"#.to_string());
    json_response(StatusCode::OK, body)
}

/// Version information for deployment verification
#[derive(Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
    pub commit: &'static str,
    pub commit_full: &'static str,
    pub build_time: &'static str,
    pub service: &'static str,
}

/// Handle version endpoint (/version)
pub fn version_info() -> Response<Full<Bytes>> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        commit_full: option_env!("GIT_COMMIT_FULL").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        service: "keyward",
    };
    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"version":"unknown","commit":"unknown"}"#.to_string());
    json_response(StatusCode::OK, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Args;
    use crate::logging::UsageLogger;
    use crate::provider::ProviderDirectory;
    use crate::service::ServiceSet;

    #[tokio::test]
    async fn test_health_reports_providers_and_handles() {
        let args = Args::software_only();
        let directory = ProviderDirectory::from_args(&args).await.unwrap();
        let state = AppState::new(
            args,
            directory,
            ServiceSet::standard().unwrap(),
            UsageLogger::new("test".into()),
        );

        let health = build_health_response(&state);
        assert!(health.healthy);
        assert_eq!(health.providers, vec!["software".to_string()]);
        assert_eq!(health.sessions, 0);
        assert_eq!(health.handles.live, 0);

        let json = serde_json::to_value(&health).unwrap();
        assert!(json.get("server_id").is_some());
        assert!(json.get("uptime").is_some());
    }

    #[test]
    fn test_version_info() {
        let response = version_info();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

//! The restic REST v2 HTTP surface and the `/admin/*` management surface
//! (spec §6), both served from one axum [`Router`].

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::center::Center;
use crate::error::DaemonError;
use crate::policy::Policy;
use crate::storage::ArtifactType;
use crate::tickets::DeletionTicket;

const RESTIC_CONTENT_TYPE: &str = "application/vnd.x.restic.rest.v2";

pub fn router(center: Arc<Center>) -> Router {
    Router::new()
        .route("/{repo}/", post(create_repo).head(probe_repo))
        .route(
            "/{repo}/config",
            post(write_config).get(read_config).head(head_config).delete(delete_config),
        )
        .route("/{repo}/{kind}/", get(list_artifacts))
        .route(
            "/{repo}/{kind}/{name}",
            post(upload_artifact).get(read_artifact).head(head_artifact).delete(delete_artifact),
        )
        .route("/admin/status", get(admin_status))
        .route("/admin/policy", get(admin_get_policy).put(admin_put_policy))
        .route("/admin/tickets", post(admin_register_ticket))
        .route("/admin/audit/tail", get(admin_audit_tail))
        .route("/admin/audit/verify", get(admin_audit_verify))
        .with_state(center)
}

//----------- Validation (spec §6) --------------------------------------------------

fn valid_repo_name(name: &str) -> bool {
    (1..=64).contains(&name.len()) && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn valid_file_name(name: &str) -> bool {
    (1..=256).contains(&name.len())
        && !name.contains("..")
        && !name.starts_with('/')
        && !name.starts_with('~')
        && !name.contains('\0')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}

fn parse_kind(kind: &str) -> Result<ArtifactType, DaemonError> {
    ArtifactType::parse(kind).ok_or_else(|| DaemonError::BadRequest(format!("unknown artifact type '{kind}'")))
}

fn check_names(repo: &str, extra: &[&str]) -> Result<(), DaemonError> {
    if !valid_repo_name(repo) {
        return Err(DaemonError::BadRequest("invalid repository name".to_string()));
    }
    for name in extra {
        if !valid_file_name(name) {
            return Err(DaemonError::BadRequest(format!("invalid name '{name}'")));
        }
    }
    Ok(())
}

//----------- Repository-level routes -----------------------------------------------

async fn create_repo(State(center): State<Arc<Center>>, Path(repo): Path<String>) -> Result<StatusCode, DaemonError> {
    check_names(&repo, &[])?;
    center.storage.create_repo(&repo)?;
    Ok(StatusCode::OK)
}

async fn probe_repo(State(center): State<Arc<Center>>, Path(repo): Path<String>) -> StatusCode {
    if valid_repo_name(&repo) && center.storage.repo_exists(&repo) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

//----------- Config route -----------------------------------------------------------

async fn write_config(
    State(center): State<Arc<Center>>,
    Path(repo): Path<String>,
    body: Bytes,
) -> Result<StatusCode, DaemonError> {
    check_names(&repo, &[])?;
    center.storage.write_config(&repo, &body)?;
    Ok(StatusCode::OK)
}

async fn read_config(State(center): State<Arc<Center>>, Path(repo): Path<String>) -> Result<Vec<u8>, DaemonError> {
    check_names(&repo, &[])?;
    center.storage.read_config(&repo)
}

async fn head_config(State(center): State<Arc<Center>>, Path(repo): Path<String>) -> StatusCode {
    if valid_repo_name(&repo) && center.storage.config_exists(&repo) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn delete_config(State(center): State<Arc<Center>>, Path(repo): Path<String>) -> Result<StatusCode, DaemonError> {
    check_names(&repo, &[])?;
    let now = center.now();
    center.authorize_and_delete_config(&repo, now)?;
    Ok(StatusCode::OK)
}

//----------- Artifact listing --------------------------------------------------------

#[derive(Serialize)]
struct FileInfo {
    name: String,
    size: u64,
}

async fn list_artifacts(
    State(center): State<Arc<Center>>,
    Path((repo, kind)): Path<(String, String)>,
) -> Result<Response, DaemonError> {
    check_names(&repo, &[])?;
    let kind = parse_kind(&kind)?;
    let entries: Vec<FileInfo> = center
        .storage
        .list(&repo, kind)?
        .into_iter()
        .map(|(name, size)| FileInfo { name, size })
        .collect();

    let body = serde_json::to_vec(&entries).map_err(DaemonError::internal)?;
    Ok(([(header::CONTENT_TYPE, RESTIC_CONTENT_TYPE)], body).into_response())
}

//----------- Artifact item routes ----------------------------------------------------

async fn upload_artifact(
    State(center): State<Arc<Center>>,
    Path((repo, kind, name)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<StatusCode, DaemonError> {
    check_names(&repo, &[&name])?;
    let kind = parse_kind(&kind)?;
    let now = center.now();
    let expected_hash = (kind == ArtifactType::Data).then_some(name.as_str());
    center.write_artifact(&repo, kind, &name, &body, expected_hash, now)?;
    Ok(StatusCode::OK)
}

async fn read_artifact(
    State(center): State<Arc<Center>>,
    Path((repo, kind, name)): Path<(String, String, String)>,
) -> Result<Vec<u8>, DaemonError> {
    check_names(&repo, &[&name])?;
    let kind = parse_kind(&kind)?;
    center.storage.read(&repo, kind, &name)
}

async fn head_artifact(
    State(center): State<Arc<Center>>,
    Path((repo, kind, name)): Path<(String, String, String)>,
) -> StatusCode {
    let Ok(kind) = parse_kind(&kind) else {
        return StatusCode::BAD_REQUEST;
    };
    if valid_repo_name(&repo) && valid_file_name(&name) && center.storage.exists(&repo, kind, &name) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

#[derive(Deserialize)]
struct DeleteQuery {
    ticket: Option<String>,
    snapshot: Option<String>,
}

async fn delete_artifact(
    State(center): State<Arc<Center>>,
    Path((repo, kind, name)): Path<(String, String, String)>,
    Query(query): Query<DeleteQuery>,
) -> Result<StatusCode, DaemonError> {
    check_names(&repo, &[&name])?;
    let kind = parse_kind(&kind)?;
    let now = center.now();
    let requires_ticket = kind == ArtifactType::Snapshots && center.config.require_tickets_for_snapshots;

    center.authorize_and_delete(
        &repo,
        kind,
        &name,
        query.snapshot.as_deref(),
        query.ticket.as_deref(),
        requires_ticket,
        now,
    )?;
    Ok(StatusCode::OK)
}

//----------- Admin surface ------------------------------------------------------------

async fn admin_status(State(center): State<Arc<Center>>) -> Json<airgapper_api::StatusWire> {
    let now = center.now();
    let snapshot = crate::status::snapshot(&center, now);
    Json((&snapshot).into())
}

async fn admin_get_policy(State(center): State<Arc<Center>>) -> Result<Json<airgapper_api::PolicyWire>, DaemonError> {
    center
        .current_policy()
        .map(|p| Json((&p).into()))
        .ok_or(DaemonError::NotFound)
}

async fn admin_put_policy(
    State(center): State<Arc<Center>>,
    Json(wire): Json<airgapper_api::PolicyWire>,
) -> Result<StatusCode, DaemonError> {
    let policy: Policy = wire.into();
    let now = center.now();
    center.set_policy(&center.storage.policy_path(), policy, now)?;
    Ok(StatusCode::OK)
}

async fn admin_register_ticket(
    State(center): State<Arc<Center>>,
    Json(wire): Json<airgapper_api::TicketWire>,
) -> Result<StatusCode, DaemonError> {
    let ticket: DeletionTicket = wire.into();
    let now = center.now();
    center.register_ticket(&center.storage.tickets_path(), ticket, now)?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
struct TailQuery {
    n: Option<usize>,
}

async fn admin_audit_tail(
    State(center): State<Arc<Center>>,
    Query(query): Query<TailQuery>,
) -> Json<airgapper_api::AuditTailResponse> {
    let n = query.n.unwrap_or(20);
    let records = center.audit.tail(n).iter().map(Into::into).collect();
    Json(airgapper_api::AuditTailResponse { records })
}

async fn admin_audit_verify(State(center): State<Arc<Center>>) -> Json<airgapper_api::AuditVerifyResponse> {
    match center.audit.verify() {
        Ok(()) => Json(airgapper_api::AuditVerifyResponse { ok: true, broken_at: None }),
        Err(err) => Json(airgapper_api::AuditVerifyResponse {
            ok: false,
            broken_at: Some(err.0),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use sha2::{Digest, Sha256};
    use tower::ServiceExt;

    fn test_center() -> (tempfile::TempDir, Arc<Center>) {
        let dir = tempfile::tempdir().unwrap();
        let base = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let storage = crate::storage::Storage::new(base.clone());
        let audit = crate::audit::AuditChain::load(base.join(".audit.json"), None).unwrap();
        let tickets = crate::tickets::TicketStore::new();
        let config = test_config(base);
        let clock = Box::new(crate::clock::FixedClock::new(0));
        let center = Arc::new(Center::new(storage, config, test_logger(), audit, tickets, clock, None));
        (dir, center)
    }

    fn test_config(base_path: camino::Utf8PathBuf) -> airgapper_cfg::Config {
        use clap::Parser;
        let mut config = airgapper_cfg::Config::parse_from(["airgapperd"]);
        config.base_path = base_path;
        config
    }

    fn test_logger() -> &'static crate::log::Logger {
        use std::sync::OnceLock;
        static LOGGER: OnceLock<&'static crate::log::Logger> = OnceLock::new();
        *LOGGER.get_or_init(|| crate::log::Logger::launch(&airgapper_cfg::LoggingConfig::default()).expect("logger init"))
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        response.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    #[tokio::test]
    async fn scenario_1_content_address_enforcement() {
        let (_dir, center) = test_center();
        let app = router(center);

        app.clone()
            .oneshot(axum::http::Request::post("/r1/").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();

        let digest = crate::hash::to_hex(&Sha256::digest(b"hello"));
        let ok = app
            .clone()
            .oneshot(
                axum::http::Request::post(format!("/r1/data/{digest}"))
                    .body(axum::body::Body::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let mismatch = app
            .oneshot(
                axum::http::Request::post(format!("/r1/data/{digest}"))
                    .body(axum::body::Body::from("world"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(mismatch.status(), StatusCode::BAD_REQUEST);
    }

    fn test_center_append_only() -> (tempfile::TempDir, Arc<Center>) {
        let dir = tempfile::tempdir().unwrap();
        let base = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let storage = crate::storage::Storage::new(base.clone());
        let audit = crate::audit::AuditChain::load(base.join(".audit.json"), None).unwrap();
        let tickets = crate::tickets::TicketStore::new();
        let mut config = test_config(base);
        config.append_only = true;
        let clock = Box::new(crate::clock::FixedClock::new(0));
        let center = Arc::new(Center::new(storage, config, test_logger(), audit, tickets, clock, None));
        (dir, center)
    }

    #[tokio::test]
    async fn scenario_2_append_only_denies_delete() {
        let (_dir, center) = test_center_append_only();
        let app = router(center);
        app.clone()
            .oneshot(axum::http::Request::post("/r1/").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        app.clone()
            .oneshot(
                axum::http::Request::post("/r1/keys/k1")
                    .body(axum::body::Body::from("key-material"))
                    .unwrap(),
            )
            .await
            .unwrap();

        let deleted = app
            .oneshot(axum::http::Request::delete("/r1/keys/k1").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(deleted.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn invalid_repo_name_is_rejected() {
        let (_dir, center) = test_center();
        let app = router(center);
        let too_long = "a".repeat(65);
        let response = app
            .oneshot(
                axum::http::Request::post(format!("/{too_long}/"))
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let _ = body_bytes(response).await;
    }
}

//! Request handlers. Each one authorizes the caller for the target in the
//! path and forwards to [`ConsoleApi`](shellgate_core::ConsoleApi); operation
//! failures come back as `200` with `success: false` in the body.

use crate::error::Result;
use crate::extract::{ApiJson, ApiQuery};
use crate::server::AppState;
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;
use shellgate_core::api::{
    ActionResponse, CdResponse, CloseSessionResponse, ConnectionResponse, ExecResponse,
    HistoryResponse, InstallResponse, ListResponse, PackageListResponse, ProcessListResponse,
    ReadFileResponse, RunResponse, SearchResponse, StatsResponse, StopResponse, UninstallResponse,
};
use shellgate_core::packages::PackagePreset;
use shellgate_core::session::SessionSnapshot;
use std::sync::Arc;

type AppStateRef = State<Arc<AppState>>;

fn home() -> String {
    "~".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    pub command: String,
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PathRequest {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "home")]
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct ReadFileQuery {
    pub file_path: String,
}

#[derive(Debug, Deserialize)]
pub struct WriteFileRequest {
    pub file_path: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub old_path: String,
    pub new_path: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub remote_path: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default = "home")]
    pub search_path: String,
    pub pattern: String,
    #[serde(default)]
    pub max_results: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct StopRequest {
    pub label: String,
}

#[derive(Debug, Deserialize)]
pub struct InstallRequest {
    pub packages: Vec<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ManifestRequest {
    pub path: String,
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PresetRequest {
    pub preset_id: String,
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct UninstallRequest {
    pub package: String,
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

pub async fn exec(
    State(state): AppStateRef,
    Path(target_id): Path<String>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<ExecRequest>,
) -> Result<Json<ExecResponse>> {
    let target = state.authorize(&headers, &target_id).await?;
    Ok(Json(state.api.exec(&target, &req.command, req.timeout).await))
}

pub async fn cd(
    State(state): AppStateRef,
    Path(target_id): Path<String>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<PathRequest>,
) -> Result<Json<CdResponse>> {
    let target = state.authorize(&headers, &target_id).await?;
    Ok(Json(state.api.cd(&target, &req.path).await))
}

pub async fn ls(
    State(state): AppStateRef,
    Path(target_id): Path<String>,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> Result<Json<ListResponse>> {
    let target = state.authorize(&headers, &target_id).await?;
    Ok(Json(state.api.ls(&target, &query.path).await))
}

pub async fn read_file(
    State(state): AppStateRef,
    Path(target_id): Path<String>,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<ReadFileQuery>,
) -> Result<Json<ReadFileResponse>> {
    let target = state.authorize(&headers, &target_id).await?;
    Ok(Json(state.api.read_file(&target, &query.file_path).await))
}

pub async fn write_file(
    State(state): AppStateRef,
    Path(target_id): Path<String>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<WriteFileRequest>,
) -> Result<Json<ActionResponse>> {
    let target = state.authorize(&headers, &target_id).await?;
    Ok(Json(
        state
            .api
            .write_file(&target, &req.file_path, &req.content)
            .await,
    ))
}

pub async fn create_file(
    State(state): AppStateRef,
    Path(target_id): Path<String>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<PathRequest>,
) -> Result<Json<ActionResponse>> {
    let target = state.authorize(&headers, &target_id).await?;
    Ok(Json(state.api.create_file(&target, &req.path).await))
}

pub async fn create_directory(
    State(state): AppStateRef,
    Path(target_id): Path<String>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<PathRequest>,
) -> Result<Json<ActionResponse>> {
    let target = state.authorize(&headers, &target_id).await?;
    Ok(Json(state.api.create_directory(&target, &req.path).await))
}

pub async fn rename(
    State(state): AppStateRef,
    Path(target_id): Path<String>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<RenameRequest>,
) -> Result<Json<ActionResponse>> {
    let target = state.authorize(&headers, &target_id).await?;
    Ok(Json(
        state.api.rename(&target, &req.old_path, &req.new_path).await,
    ))
}

pub async fn delete(
    State(state): AppStateRef,
    Path(target_id): Path<String>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<PathRequest>,
) -> Result<Json<ActionResponse>> {
    let target = state.authorize(&headers, &target_id).await?;
    Ok(Json(state.api.delete(&target, &req.path).await))
}

/// Raw request body, destination in the query string.
pub async fn upload(
    State(state): AppStateRef,
    Path(target_id): Path<String>,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<UploadQuery>,
    body: Bytes,
) -> Result<Json<ActionResponse>> {
    let target = state.authorize(&headers, &target_id).await?;
    Ok(Json(
        state
            .api
            .upload(
                &target,
                &query.remote_path,
                query.file_name.as_deref(),
                &body,
            )
            .await,
    ))
}

pub async fn search(
    State(state): AppStateRef,
    Path(target_id): Path<String>,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> Result<Json<SearchResponse>> {
    let target = state.authorize(&headers, &target_id).await?;
    Ok(Json(
        state
            .api
            .search(&target, &query.search_path, &query.pattern, query.max_results)
            .await,
    ))
}

pub async fn detailed_stats(
    State(state): AppStateRef,
    Path(target_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<StatsResponse>> {
    let target = state.authorize(&headers, &target_id).await?;
    Ok(Json(state.api.detailed_stats(&target).await))
}

pub async fn check_connection(
    State(state): AppStateRef,
    Path(target_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ConnectionResponse>> {
    let target = state.authorize(&headers, &target_id).await?;
    Ok(Json(state.api.check_connection(&target).await))
}

pub async fn run(
    State(state): AppStateRef,
    Path(target_id): Path<String>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<PathRequest>,
) -> Result<Json<RunResponse>> {
    let target = state.authorize(&headers, &target_id).await?;
    Ok(Json(state.api.run_background(&target, &req.path).await))
}

pub async fn stop(
    State(state): AppStateRef,
    Path(target_id): Path<String>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<StopRequest>,
) -> Result<Json<StopResponse>> {
    let target = state.authorize(&headers, &target_id).await?;
    Ok(Json(state.api.stop_background(&target, &req.label).await))
}

pub async fn processes(
    State(state): AppStateRef,
    Path(target_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ProcessListResponse>> {
    let target = state.authorize(&headers, &target_id).await?;
    Ok(Json(state.api.list_background(&target).await))
}

pub async fn history(
    State(state): AppStateRef,
    Path(target_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<HistoryResponse>> {
    let target = state.authorize(&headers, &target_id).await?;
    Ok(Json(state.api.history(&target).await))
}

pub async fn session_info(
    State(state): AppStateRef,
    Path(target_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SessionSnapshot>> {
    let target = state.authorize(&headers, &target_id).await?;
    Ok(Json(state.api.session_info(&target).await))
}

pub async fn close_session(
    State(state): AppStateRef,
    Path(target_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<CloseSessionResponse>> {
    let target = state.authorize(&headers, &target_id).await?;
    Ok(Json(state.api.close_session(&target)))
}

pub async fn installed_packages(
    State(state): AppStateRef,
    Path(target_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<PackageListResponse>> {
    let target = state.authorize(&headers, &target_id).await?;
    Ok(Json(state.api.installed_packages(&target).await))
}

pub async fn install(
    State(state): AppStateRef,
    Path(target_id): Path<String>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<InstallRequest>,
) -> Result<Json<InstallResponse>> {
    let target = state.authorize(&headers, &target_id).await?;
    Ok(Json(
        state.api.install(&target, &req.packages, req.timeout).await,
    ))
}

pub async fn install_manifest(
    State(state): AppStateRef,
    Path(target_id): Path<String>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<ManifestRequest>,
) -> Result<Json<InstallResponse>> {
    let target = state.authorize(&headers, &target_id).await?;
    Ok(Json(
        state
            .api
            .install_from_manifest(&target, &req.path, req.timeout)
            .await,
    ))
}

pub async fn install_preset(
    State(state): AppStateRef,
    Path(target_id): Path<String>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<PresetRequest>,
) -> Result<Json<InstallResponse>> {
    let target = state.authorize(&headers, &target_id).await?;
    Ok(Json(
        state
            .api
            .install_preset(&target, &req.preset_id, req.timeout)
            .await,
    ))
}

pub async fn uninstall(
    State(state): AppStateRef,
    Path(target_id): Path<String>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<UninstallRequest>,
) -> Result<Json<UninstallResponse>> {
    let target = state.authorize(&headers, &target_id).await?;
    Ok(Json(state.api.uninstall(&target, &req.package).await))
}

pub async fn presets(
    State(state): AppStateRef,
    Path(target_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<PackagePreset>>> {
    state.authorize(&headers, &target_id).await?;
    Ok(Json(state.api.presets().to_vec()))
}

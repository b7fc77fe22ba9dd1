//! Read, migrate, activate and prune endpoints.

use super::{actor, parse_version};
use crate::error::AppError;
use axum::extract::{Extension, Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use taxo_kernel::change_set::ChangeSet;
use taxo_kernel::engine::TaxonomyEngine;
use taxo_kernel::migration::PreviewResult;
use taxo_kernel::version::{TaxonomyDiff, TreeDocument, VersionMeta};
use taxo_kernel::{Actor, VersionId};

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionList {
    pub versions: Vec<VersionMeta>,
    pub active: VersionId,
}

#[derive(Debug, Deserialize)]
pub struct DiffQuery {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MigrateRequest {
    pub base_version: VersionId,
    pub change_set: ChangeSet,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MigrateResponse {
    pub version_id: VersionId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActivateResponse {
    pub active_version: VersionId,
}

pub async fn list_versions(
    Extension(engine): Extension<Arc<TaxonomyEngine>>,
) -> Json<VersionList> {
    Json(VersionList {
        versions: engine.list_versions(),
        active: engine.active_version(),
    })
}

pub async fn active_tree(
    Extension(engine): Extension<Arc<TaxonomyEngine>>,
) -> Result<Json<TreeDocument>, AppError> {
    Ok(Json(engine.get_tree(None)?.to_document()))
}

pub async fn version_tree(
    Extension(engine): Extension<Arc<TaxonomyEngine>>,
    Path(version): Path<String>,
) -> Result<Json<TreeDocument>, AppError> {
    let version = parse_version(&version)?;
    Ok(Json(engine.get_tree(Some(version))?.to_document()))
}

pub async fn diff(
    Extension(engine): Extension<Arc<TaxonomyEngine>>,
    Query(query): Query<DiffQuery>,
) -> Result<Json<TaxonomyDiff>, AppError> {
    let from = parse_version(&query.from)?;
    let to = parse_version(&query.to)?;
    Ok(Json(engine.diff(from, to)?))
}

/// The header wins; otherwise the body's author, unless it is the anonymous default.
fn author(headers: &HeaderMap, engine: &TaxonomyEngine, change_set: &ChangeSet) -> Actor {
    if headers.contains_key(super::ACTOR_HEADER) || change_set.author == Actor::default() {
        actor(headers, engine)
    } else {
        change_set.author.clone()
    }
}

pub async fn migrate(
    Extension(engine): Extension<Arc<TaxonomyEngine>>,
    headers: HeaderMap,
    Json(mut request): Json<MigrateRequest>,
) -> Result<(StatusCode, Json<MigrateResponse>), AppError> {
    request.change_set.author = author(&headers, &engine, &request.change_set);
    let version_id = engine
        .apply(request.base_version, &request.change_set)
        .await?;
    Ok((StatusCode::CREATED, Json(MigrateResponse { version_id })))
}

pub async fn preview(
    Extension(engine): Extension<Arc<TaxonomyEngine>>,
    Json(request): Json<MigrateRequest>,
) -> Result<Json<PreviewResult>, AppError> {
    Ok(Json(
        engine.propose(request.base_version, &request.change_set)?,
    ))
}

pub async fn activate(
    Extension(engine): Extension<Arc<TaxonomyEngine>>,
    headers: HeaderMap,
    Path(version): Path<String>,
) -> Result<Json<ActivateResponse>, AppError> {
    let version = parse_version(&version)?;
    engine.activate(version, actor(&headers, &engine)).await?;
    Ok(Json(ActivateResponse {
        active_version: engine.active_version(),
    }))
}

pub async fn prune(
    Extension(engine): Extension<Arc<TaxonomyEngine>>,
    headers: HeaderMap,
    Path(version): Path<String>,
) -> Result<StatusCode, AppError> {
    let version = parse_version(&version)?;
    engine.prune(version, actor(&headers, &engine)).await?;
    Ok(StatusCode::NO_CONTENT)
}

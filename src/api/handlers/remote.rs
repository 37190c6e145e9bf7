//! Signed routes served to `RemoteDelegate` instances. Every handler checks
//! the request signature against the payload before touching the disk.

use super::folders::{DeleteForm, RenameForm};
use super::{UploadQuery, read_files};
use crate::AppState;
use crate::api::error::AppError;
use crate::models::{FolderKey, FolderResult, Listing, ListingBody, ResultBody};
use crate::services::remote::{actions, payload};
use crate::utils::auth::SignedToken;
use crate::utils::validation::validate_file_name;
use axum::{
    Extension, Form, Json,
    extract::{Multipart, Path, Query, State},
};

#[utoipa::path(
    get,
    path = "/remote/list/{key}",
    params(("key" = String, Path, description = "Folder key")),
    responses(
        (status = 200, description = "Files in the folder", body = ListingBody),
        (status = 401, description = "Missing, malformed, stale or wrong signature")
    ),
    security(("signed" = [])),
    tag = "remote"
)]
pub async fn list(
    State(state): State<AppState>,
    Extension(signed): Extension<SignedToken>,
    Path(key): Path<String>,
) -> Result<Json<Listing>, AppError> {
    let key = FolderKey::parse(&key)?;
    state.auth.verify(&signed, actions::LIST, &payload::list(&key))?;

    Ok(Json(state.local.list_files(&key, None).await))
}

#[utoipa::path(
    post,
    path = "/remote/upload/{key}",
    params(("key" = String, Path, description = "Folder key"), UploadQuery),
    request_body(content = Multipart, description = "One or more file fields"),
    responses(
        (status = 200, description = "Upload outcome", body = ResultBody),
        (status = 401, description = "Missing, malformed, stale or wrong signature")
    ),
    security(("signed" = [])),
    tag = "remote"
)]
pub async fn upload(
    State(state): State<AppState>,
    Extension(signed): Extension<SignedToken>,
    Path(key): Path<String>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Json<FolderResult>, AppError> {
    let key = FolderKey::parse(&key)?;
    let files = read_files(&mut multipart).await?;
    state.auth.verify(
        &signed,
        actions::UPLOAD,
        &payload::upload(&key, payload::checksum(&files)),
    )?;

    let options = query.into_options()?;
    Ok(Json(state.local.upload_files(&key, &files, &options).await))
}

#[utoipa::path(
    post,
    path = "/remote/rename/{key}",
    params(("key" = String, Path, description = "Folder key")),
    request_body(content = RenameForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Rename outcome", body = ResultBody),
        (status = 401, description = "Missing, malformed, stale or wrong signature")
    ),
    security(("signed" = [])),
    tag = "remote"
)]
pub async fn rename(
    State(state): State<AppState>,
    Extension(signed): Extension<SignedToken>,
    Path(key): Path<String>,
    Form(form): Form<RenameForm>,
) -> Result<Json<FolderResult>, AppError> {
    let key = FolderKey::parse(&key)?;
    state.auth.verify(
        &signed,
        actions::RENAME,
        &payload::rename(&key, &form.file_name, &form.new_name),
    )?;

    validate_file_name(&form.file_name)?;
    validate_file_name(&form.new_name)?;
    Ok(Json(
        state
            .local
            .rename_file(&key, &form.file_name, &form.new_name)
            .await,
    ))
}

#[utoipa::path(
    post,
    path = "/remote/delete/{key}",
    params(("key" = String, Path, description = "Folder key")),
    request_body(content = DeleteForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Delete outcome", body = ResultBody),
        (status = 401, description = "Missing, malformed, stale or wrong signature")
    ),
    security(("signed" = [])),
    tag = "remote"
)]
pub async fn delete(
    State(state): State<AppState>,
    Extension(signed): Extension<SignedToken>,
    Path(key): Path<String>,
    Form(form): Form<DeleteForm>,
) -> Result<Json<FolderResult>, AppError> {
    let key = FolderKey::parse(&key)?;
    state
        .auth
        .verify(&signed, actions::DELETE, &payload::delete(&key, &form.file_name))?;

    validate_file_name(&form.file_name)?;
    Ok(Json(state.local.delete_file(&key, &form.file_name).await))
}

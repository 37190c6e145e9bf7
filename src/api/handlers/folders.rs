use super::{UploadQuery, read_files, request_context};
use crate::AppState;
use crate::api::error::AppError;
use crate::models::{FolderError, FolderKey, FolderResult, Listing, ListingBody, ResultBody, codes};
use crate::services::chunk::{NameOptions, PartHeaders, PartOutcome};
use crate::utils::validation::validate_file_name;
use axum::{
    Form, Json,
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RenameForm {
    #[validate(length(min = 1, max = 255, message = "fileName is required"))]
    pub file_name: String,
    #[validate(length(min = 1, max = 255, message = "newName is required"))]
    pub new_name: String,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DeleteForm {
    #[validate(length(min = 1, max = 255, message = "fileName is required"))]
    pub file_name: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenameResponse {
    pub success: bool,
    pub errors: Vec<FolderError>,
    pub new_file_name: Option<String>,
    pub file_not_found: bool,
}

impl RenameResponse {
    pub fn new(result: FolderResult, new_name: String) -> Self {
        let file_not_found = result.has_code(codes::FILE_NOT_FOUND);
        match result {
            FolderResult::Success => Self {
                success: true,
                errors: Vec::new(),
                new_file_name: Some(new_name),
                file_not_found,
            },
            FolderResult::Failed(errors) => Self {
                success: false,
                errors,
                new_file_name: None,
                file_not_found,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PartResponse {
    pub success: bool,
    pub errors: Vec<FolderError>,
    /// True once the final part has been stored and the file moved into place
    pub completed: bool,
    pub parts_received: Option<u32>,
    /// Name the assembled file was stored under
    pub file_name: Option<String>,
}

impl From<PartOutcome> for PartResponse {
    fn from(outcome: PartOutcome) -> Self {
        match outcome {
            PartOutcome::Accepted { parts_received } => Self {
                success: true,
                errors: Vec::new(),
                completed: false,
                parts_received: Some(parts_received),
                file_name: None,
            },
            PartOutcome::Completed { path } => Self {
                success: true,
                errors: Vec::new(),
                completed: true,
                parts_received: None,
                file_name: path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string),
            },
            PartOutcome::Failed(errors) => Self {
                success: false,
                errors,
                completed: false,
                parts_received: None,
                file_name: None,
            },
        }
    }
}

#[utoipa::path(
    get,
    path = "/folders/list/{key}",
    params(("key" = String, Path, description = "Folder key, e.g. images/products")),
    responses(
        (status = 200, description = "Files in the folder, or the errors that prevented listing", body = ListingBody),
        (status = 400, description = "Invalid folder key")
    ),
    tag = "folders"
)]
pub async fn list_folder(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Listing>, AppError> {
    let key = FolderKey::parse(&key)?;
    let (ctx, _cancel_on_drop) = request_context(&headers);

    Ok(Json(state.folders.list(&key, &ctx).await))
}

#[utoipa::path(
    post,
    path = "/folders/upload/{key}",
    params(("key" = String, Path, description = "Folder key"), UploadQuery),
    request_body(content = Multipart, description = "One or more file fields"),
    responses(
        (status = 200, description = "Upload outcome", body = ResultBody),
        (status = 400, description = "Invalid folder key, file name or body"),
        (status = 413, description = "Body exceeds MAX_UPLOAD_SIZE")
    ),
    tag = "folders"
)]
pub async fn upload_files(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<FolderResult>, AppError> {
    let key = FolderKey::parse(&key)?;
    let options = query.into_options()?;
    let files = read_files(&mut multipart).await?;
    let (ctx, _cancel_on_drop) = request_context(&headers);

    let result = state.folders.upload(&key, files, options, &ctx).await;
    Ok(Json(result))
}

/// One part of a chunked upload. The part is described by the
/// `X-File-ID`, `X-Part-Index`, `X-Part-Count`, `X-Part-Size` and (on the
/// last part) `X-File-Name` headers; the raw body is the part's bytes.
#[utoipa::path(
    post,
    path = "/folders/parts/{key}",
    params(("key" = String, Path, description = "Folder key"), UploadQuery),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Part outcome", body = PartResponse),
        (status = 400, description = "Malformed part headers or body size mismatch"),
        (status = 404, description = "Chunked uploads are not served in delegate mode")
    ),
    tag = "folders"
)]
pub async fn upload_part(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PartResponse>, AppError> {
    let Some(assembler) = state.assembler.as_ref() else {
        return Err(AppError::NotFound(
            "Chunked uploads are only served in local mode".to_string(),
        ));
    };

    let key = FolderKey::parse(&key)?;
    let part = PartHeaders::from_headers(&headers)?;
    part.check_body(body.len())?;

    let options = query.into_options()?;
    let naming = NameOptions {
        base_override: options.base_name,
        slugify: state.config.slugify_names,
    };

    let outcome = assembler.append_part(&key, &part, &body, &naming).await;
    Ok(Json(outcome.into()))
}

#[utoipa::path(
    post,
    path = "/folders/rename/{key}",
    params(("key" = String, Path, description = "Folder key")),
    request_body(content = RenameForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Rename outcome", body = RenameResponse),
        (status = 400, description = "Invalid folder key or names")
    ),
    tag = "folders"
)]
pub async fn rename_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    Form(form): Form<RenameForm>,
) -> Result<Json<RenameResponse>, AppError> {
    form.validate()?;
    let key = FolderKey::parse(&key)?;
    validate_file_name(&form.file_name)?;
    validate_file_name(&form.new_name)?;
    let (ctx, _cancel_on_drop) = request_context(&headers);

    let result = state
        .folders
        .rename(&key, &form.file_name, &form.new_name, &ctx)
        .await;
    Ok(Json(RenameResponse::new(result, form.new_name)))
}

#[utoipa::path(
    post,
    path = "/folders/delete/{key}",
    params(("key" = String, Path, description = "Folder key")),
    request_body(content = DeleteForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Delete outcome; deleting a missing file succeeds", body = ResultBody),
        (status = 400, description = "Invalid folder key or file name")
    ),
    tag = "folders"
)]
pub async fn delete_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    Form(form): Form<DeleteForm>,
) -> Result<Json<FolderResult>, AppError> {
    form.validate()?;
    let key = FolderKey::parse(&key)?;
    validate_file_name(&form.file_name)?;
    let (ctx, _cancel_on_drop) = request_context(&headers);

    Ok(Json(state.folders.delete(&key, &form.file_name, &ctx).await))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_rename_response_flags() {
        let ok = RenameResponse::new(FolderResult::Success, "b.png".to_string());
        assert!(ok.success);
        assert_eq!(ok.new_file_name.as_deref(), Some("b.png"));
        assert!(!ok.file_not_found);

        let missing = RenameResponse::new(
            FolderResult::failed(FolderError::file_not_found("a.png")),
            "b.png".to_string(),
        );
        assert!(!missing.success);
        assert!(missing.file_not_found);
        assert!(missing.new_file_name.is_none());
    }

    #[test]
    fn test_part_response_from_outcome() {
        let done = PartResponse::from(PartOutcome::Completed {
            path: PathBuf::from("/srv/www/videos/clip.mp4"),
        });
        assert!(done.completed);
        assert_eq!(done.file_name.as_deref(), Some("clip.mp4"));

        let partial = PartResponse::from(PartOutcome::Accepted { parts_received: 2 });
        assert!(partial.success && !partial.completed);
        assert_eq!(partial.parts_received, Some(2));
    }
}

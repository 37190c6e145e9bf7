pub mod folders;
pub mod health;
pub mod remote;

use crate::api::error::AppError;
use crate::models::UploadedFile;
use crate::services::folder::{RequestContext, UploadOptions};
use crate::utils::validation::{client_file_name, validate_file_name};
use axum::extract::Multipart;
use axum::http::{HeaderMap, header};
use serde::Deserialize;
use tokio_util::sync::{CancellationToken, DropGuard};
use utoipa::IntoParams;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UploadQuery {
    /// Replace the folder's contents with the uploaded file
    #[serde(default)]
    pub single: bool,
    /// Base name (without extension) for a lone uploaded file
    pub name: Option<String>,
}

impl UploadQuery {
    pub fn into_options(self) -> Result<UploadOptions, AppError> {
        let base_name = match self.name {
            Some(name) if !name.trim().is_empty() => {
                validate_file_name(&name)?;
                Some(name)
            }
            _ => None,
        };
        Ok(UploadOptions {
            single: self.single,
            base_name,
        })
    }
}

/// Builds the context for one request. The returned guard cancels the
/// context when dropped, which happens when the client goes away and axum
/// drops the handler future.
pub(crate) fn request_context(headers: &HeaderMap) -> (RequestContext, DropGuard) {
    let base_url = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|host| {
            let scheme = headers
                .get("x-forwarded-proto")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("http");
            format!("{}://{}", scheme, host)
        });

    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    (RequestContext::new(base_url, cancel), guard)
}

/// Reads every file field of a multipart body into memory. Fields without a
/// file name are ignored.
pub(crate) async fn read_files(multipart: &mut Multipart) -> Result<Vec<UploadedFile>, AppError> {
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let Some(raw_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        // browsers send an empty part for a file input left blank
        if raw_name.is_empty() {
            continue;
        }

        let file_name = validate_file_name(client_file_name(&raw_name))?.to_string();
        let data = field.bytes().await?;
        files.push(UploadedFile::new(file_name, data));
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_request_context_base_url() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("cdn.example.com"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));

        let (ctx, _guard) = request_context(&headers);
        assert_eq!(ctx.base_url.as_deref(), Some("https://cdn.example.com"));

        let (ctx, _guard) = request_context(&HeaderMap::new());
        assert!(ctx.base_url.is_none());
    }

    #[test]
    fn test_dropping_guard_cancels() {
        let (ctx, guard) = request_context(&HeaderMap::new());
        assert!(!ctx.cancel.is_cancelled());
        drop(guard);
        assert!(ctx.cancel.is_cancelled());
    }

    #[test]
    fn test_upload_query_name_must_be_plain() {
        let query = UploadQuery {
            single: true,
            name: Some("../avatar".to_string()),
        };
        assert!(query.into_options().is_err());

        let options = UploadQuery {
            single: false,
            name: Some("  ".to_string()),
        }
        .into_options()
        .unwrap();
        assert!(options.base_name.is_none());
    }
}

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use utoipa::ToSchema;

pub mod codes {
    pub const FILE_SYSTEM_ERROR: &str = "FileSystemError";
    pub const NO_FILE_TO_UPLOAD: &str = "NoFileToUpload";
    // Misspelling kept: callers branch on this exact string.
    pub const TO_MANY_FILES_TO_UPLOAD: &str = "ToManyFilesToUpload";
    pub const FILE_NOT_FOUND: &str = "FileNotFound";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FolderError {
    pub code: String,
    pub description: String,
}

impl FolderError {
    pub fn new(code: &str, description: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            description: description.into(),
        }
    }

    pub fn file_system(description: impl Into<String>) -> Self {
        Self::new(codes::FILE_SYSTEM_ERROR, description)
    }

    pub fn no_file_to_upload() -> Self {
        Self::new(codes::NO_FILE_TO_UPLOAD, "There is no file to upload.")
    }

    pub fn too_many_files_to_upload() -> Self {
        Self::new(
            codes::TO_MANY_FILES_TO_UPLOAD,
            "Only one file can be uploaded to this folder.",
        )
    }

    pub fn file_not_found(file_name: &str) -> Self {
        Self::new(
            codes::FILE_NOT_FOUND,
            format!("File '{}' was not found.", file_name),
        )
    }
}

/// Outcome of a folder operation. Operational and domain failures travel in
/// `Failed`; they are never raised as Rust errors past the component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "ResultBody", try_from = "ResultBody")]
pub enum FolderResult {
    Success,
    Failed(Vec<FolderError>),
}

impl FolderResult {
    pub fn failed(error: FolderError) -> Self {
        FolderResult::Failed(vec![error])
    }

    pub fn succeeded(&self) -> bool {
        matches!(self, FolderResult::Success)
    }

    pub fn errors(&self) -> &[FolderError] {
        match self {
            FolderResult::Success => &[],
            FolderResult::Failed(errors) => errors,
        }
    }

    /// Folds several results into one, keeping every error in order.
    pub fn aggregate(results: impl IntoIterator<Item = FolderResult>) -> Self {
        let errors: Vec<FolderError> = results
            .into_iter()
            .flat_map(|r| match r {
                FolderResult::Success => Vec::new(),
                FolderResult::Failed(errors) => errors,
            })
            .collect();

        if errors.is_empty() {
            FolderResult::Success
        } else {
            FolderResult::Failed(errors)
        }
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.errors().iter().any(|e| e.code == code)
    }
}

/// Wire shape of a [`FolderResult`].
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResultBody {
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<FolderError>,
}

impl From<FolderResult> for ResultBody {
    fn from(result: FolderResult) -> Self {
        match result {
            FolderResult::Success => ResultBody {
                success: true,
                errors: Vec::new(),
            },
            FolderResult::Failed(errors) => ResultBody {
                success: false,
                errors,
            },
        }
    }
}

impl TryFrom<ResultBody> for FolderResult {
    type Error = String;

    fn try_from(body: ResultBody) -> Result<Self, Self::Error> {
        match (body.success, body.errors.is_empty()) {
            (true, true) => Ok(FolderResult::Success),
            (true, false) => Err("result reports success and errors at once".to_string()),
            (false, _) => Ok(FolderResult::Failed(body.errors)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub index: usize,
    pub file_name: String,
    pub file_size: i64,
    /// Virtual path, `key/fileName`.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absolute_url: Option<String>,
}

/// Directory listing outcome, shaped like [`FolderResult`] on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "ListingBody", try_from = "ListingBody")]
pub enum Listing {
    Items(Vec<StoredFile>),
    Failed(Vec<FolderError>),
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListingBody {
    pub success: bool,
    #[serde(default)]
    pub items: Vec<StoredFile>,
    #[serde(default)]
    pub errors: Vec<FolderError>,
}

impl From<Listing> for ListingBody {
    fn from(listing: Listing) -> Self {
        match listing {
            Listing::Items(items) => ListingBody {
                success: true,
                items,
                errors: Vec::new(),
            },
            Listing::Failed(errors) => ListingBody {
                success: false,
                items: Vec::new(),
                errors,
            },
        }
    }
}

impl TryFrom<ListingBody> for Listing {
    type Error = String;

    fn try_from(body: ListingBody) -> Result<Self, Self::Error> {
        if body.success {
            if !body.errors.is_empty() {
                return Err("listing reports success and errors at once".to_string());
            }
            Ok(Listing::Items(body.items))
        } else {
            Ok(Listing::Failed(body.errors))
        }
    }
}

/// A file received in a request body, held in memory until it is saved.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub data: Bytes,
}

impl UploadedFile {
    pub fn new(file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            data: data.into(),
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidKey {
    #[error("folder key is blank")]
    Blank,
    #[error("folder key '{0}' escapes the folder root")]
    Escapes(String),
}

/// Normalised virtual folder path, e.g. `images/products`.
///
/// Leading `~` and `/` are stripped. Blank keys and keys with `..` or
/// absolute components are rejected before any I/O happens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FolderKey(String);

impl FolderKey {
    pub fn parse(raw: &str) -> Result<Self, InvalidKey> {
        let trimmed = raw
            .trim()
            .trim_start_matches('~')
            .trim_start_matches('/')
            .trim_end_matches('/');

        if trimmed.trim().is_empty() {
            return Err(InvalidKey::Blank);
        }

        let normalized = trimmed.replace('\\', "/");
        let segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
        let ok = segments.iter().all(|s| {
            let mut components = Path::new(s).components();
            matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none()
        });
        if !ok {
            return Err(InvalidKey::Escapes(raw.to_string()));
        }

        Ok(Self(segments.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Physical directory for this key under `root`.
    pub fn to_path(&self, root: &Path) -> PathBuf {
        self.0.split('/').fold(root.to_path_buf(), |p, s| p.join(s))
    }

    pub fn virtual_path(&self, file_name: &str) -> String {
        format!("{}/{}", self.0, file_name)
    }
}

impl std::fmt::Display for FolderKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_key_normalizes_prefixes() {
        let key = FolderKey::parse("~/images/products/").unwrap();
        assert_eq!(key.as_str(), "images/products");
        assert_eq!(
            key.to_path(Path::new("/srv/www")),
            PathBuf::from("/srv/www/images/products")
        );
    }

    #[test]
    fn test_folder_key_rejects_blank_and_traversal() {
        assert_eq!(FolderKey::parse("   "), Err(InvalidKey::Blank));
        assert_eq!(FolderKey::parse("~/"), Err(InvalidKey::Blank));
        assert!(matches!(
            FolderKey::parse("images/../../etc"),
            Err(InvalidKey::Escapes(_))
        ));
        assert!(matches!(
            FolderKey::parse("./images"),
            Err(InvalidKey::Escapes(_))
        ));
    }

    #[test]
    fn test_aggregate_keeps_error_order() {
        let result = FolderResult::aggregate(vec![
            FolderResult::failed(FolderError::file_system("first")),
            FolderResult::Success,
            FolderResult::failed(FolderError::file_system("second")),
        ]);
        let descriptions: Vec<_> = result.errors().iter().map(|e| e.description.as_str()).collect();
        assert_eq!(descriptions, vec!["first", "second"]);
        assert!(FolderResult::aggregate(vec![FolderResult::Success]).succeeded());
    }

    #[test]
    fn test_result_wire_shape() {
        let json = serde_json::to_value(FolderResult::failed(FolderError::no_file_to_upload())).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["errors"][0]["code"], "NoFileToUpload");

        let ok: FolderResult = serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert_eq!(ok, FolderResult::Success);

        let contradictory = serde_json::from_str::<FolderResult>(
            r#"{"success":true,"errors":[{"code":"x","description":"y"}]}"#,
        );
        assert!(contradictory.is_err());
    }
}

use crate::models::{FolderError, FolderKey, FolderResult};
use crate::services::filename;
use crate::services::folder::move_file;
use crate::utils::keyed_mutex::KeyedMutex;
use crate::utils::validation::validate_file_name;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use percent_encoding::percent_decode_str;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

pub const FILE_ID_HEADER: &str = "X-File-ID";
pub const PART_INDEX_HEADER: &str = "X-Part-Index";
pub const PART_COUNT_HEADER: &str = "X-Part-Count";
pub const PART_SIZE_HEADER: &str = "X-Part-Size";
pub const FILE_NAME_HEADER: &str = "X-File-Name";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PartHeaderError {
    #[error("missing '{0}' header")]
    Missing(&'static str),

    #[error("header '{name}' is not a valid number: '{value}'")]
    NotANumber { name: &'static str, value: String },

    #[error("part count must be at least 1")]
    ZeroCount,

    #[error("part index {index} is outside 0..{count}")]
    IndexOutOfRange { index: u32, count: u32 },

    #[error("body is {actual} bytes but X-Part-Size says {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("invalid file id: {0}")]
    InvalidFileId(String),

    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    #[error("header '{0}' is not valid URL-encoded UTF-8")]
    InvalidEncoding(&'static str),
}

/// One part of a chunked upload, as described by the request headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartHeaders {
    pub file_id: String,
    pub part_index: u32,
    pub part_count: u32,
    pub part_size: u64,
    /// Only required (and only used) on the final part.
    pub file_name: Option<String>,
}

impl PartHeaders {
    pub fn new(file_id: impl Into<String>, part_index: u32, part_count: u32, part_size: u64) -> Self {
        Self {
            file_id: file_id.into(),
            part_index,
            part_count,
            part_size,
            file_name: None,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn from_headers(headers: &HeaderMap) -> Result<Self, PartHeaderError> {
        let file_id = decoded_header(headers, FILE_ID_HEADER)?
            .ok_or(PartHeaderError::Missing(FILE_ID_HEADER))?;
        let part_index = numeric_header(headers, PART_INDEX_HEADER)?;
        let part_count = numeric_header(headers, PART_COUNT_HEADER)?;
        let part_size = numeric_header(headers, PART_SIZE_HEADER)?;
        let file_name = decoded_header(headers, FILE_NAME_HEADER)?;

        let part = Self {
            file_id,
            part_index,
            part_count,
            part_size,
            file_name,
        };
        part.check()?;
        Ok(part)
    }

    pub fn is_final(&self) -> bool {
        self.part_index + 1 == self.part_count
    }

    /// Structural checks; run before any bytes touch the disk.
    pub fn check(&self) -> Result<(), PartHeaderError> {
        validate_file_name(&self.file_id)
            .map_err(|e| PartHeaderError::InvalidFileId(e.message))?;

        if self.part_count == 0 {
            return Err(PartHeaderError::ZeroCount);
        }
        if self.part_index >= self.part_count {
            return Err(PartHeaderError::IndexOutOfRange {
                index: self.part_index,
                count: self.part_count,
            });
        }

        if self.is_final() {
            let name = self
                .file_name
                .as_deref()
                .ok_or(PartHeaderError::Missing(FILE_NAME_HEADER))?;
            validate_file_name(name).map_err(|e| PartHeaderError::InvalidFileName(e.message))?;
        }
        Ok(())
    }

    pub fn check_body(&self, body_len: usize) -> Result<(), PartHeaderError> {
        if body_len as u64 != self.part_size {
            return Err(PartHeaderError::SizeMismatch {
                expected: self.part_size,
                actual: body_len as u64,
            });
        }
        Ok(())
    }
}

fn decoded_header(headers: &HeaderMap, name: &'static str) -> Result<Option<String>, PartHeaderError> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    let raw = value
        .to_str()
        .map_err(|_| PartHeaderError::InvalidEncoding(name))?;
    // form-style encoding: '+' stands for a space
    let raw = raw.replace('+', " ");
    let decoded = percent_decode_str(&raw)
        .decode_utf8()
        .map_err(|_| PartHeaderError::InvalidEncoding(name))?;
    Ok(Some(decoded.into_owned()))
}

fn numeric_header<T: std::str::FromStr>(
    headers: &HeaderMap,
    name: &'static str,
) -> Result<T, PartHeaderError> {
    let value = headers
        .get(name)
        .ok_or(PartHeaderError::Missing(name))?;
    let text = value.to_str().unwrap_or_default().trim();
    text.parse().map_err(|_| PartHeaderError::NotANumber {
        name,
        value: text.to_string(),
    })
}

/// Naming options applied when a finished file is moved into place.
#[derive(Debug, Clone, Default)]
pub struct NameOptions {
    pub base_override: Option<String>,
    pub slugify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub file_id: String,
    pub part_count: u32,
    pub parts_received: u32,
    pub bytes_received: u64,
    pub staging_path: PathBuf,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartOutcome {
    /// Part stored, more parts expected.
    Accepted { parts_received: u32 },
    /// Final part stored and the file moved to `path`.
    Completed { path: PathBuf },
    Failed(Vec<FolderError>),
}

impl From<PartOutcome> for FolderResult {
    fn from(outcome: PartOutcome) -> Self {
        match outcome {
            PartOutcome::Accepted { .. } | PartOutcome::Completed { .. } => FolderResult::Success,
            PartOutcome::Failed(errors) => FolderResult::Failed(errors),
        }
    }
}

fn fs_failure(e: io::Error) -> PartOutcome {
    PartOutcome::Failed(vec![FolderError::file_system(e.to_string())])
}

/// Reassembles files uploaded as sequential parts.
///
/// Each `file_id` owns one staging file under `staging_dir`. Parts are
/// appended at end-of-file in arrival order; the index is only used to
/// detect the final part, so parts sent out of order or twice end up out of
/// order or twice in the output. Appends for one id are serialized.
#[derive(Clone)]
pub struct ChunkAssembler {
    root: PathBuf,
    staging_dir: PathBuf,
    sessions: Arc<DashMap<String, UploadSession>>,
    locks: KeyedMutex,
}

impl ChunkAssembler {
    pub fn new(root: impl Into<PathBuf>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            staging_dir: staging_dir.into(),
            sessions: Arc::new(DashMap::new()),
            locks: KeyedMutex::new(),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn staging_path(&self, file_id: &str) -> PathBuf {
        self.staging_dir.join(file_id)
    }

    pub fn session(&self, file_id: &str) -> Option<UploadSession> {
        self.sessions.get(file_id).map(|s| s.clone())
    }

    /// Appends one part and, on the final part, moves the assembled file
    /// into the directory for `key`.
    ///
    /// `part` must have passed [`PartHeaders::check`].
    pub async fn append_part(
        &self,
        key: &FolderKey,
        part: &PartHeaders,
        bytes: &[u8],
        naming: &NameOptions,
    ) -> PartOutcome {
        let guard = self.locks.lock(&part.file_id).await;
        let outcome = self.append_locked(key, part, bytes, naming).await;
        drop(guard);

        if matches!(outcome, PartOutcome::Completed { .. }) {
            self.locks.forget(&part.file_id);
        }
        outcome
    }

    async fn append_locked(
        &self,
        key: &FolderKey,
        part: &PartHeaders,
        bytes: &[u8],
        naming: &NameOptions,
    ) -> PartOutcome {
        if let Err(e) = tokio::fs::create_dir_all(&self.staging_dir).await {
            return fs_failure(e);
        }

        let staging_path = self.staging_path(&part.file_id);
        let expected_index = self
            .sessions
            .get(&part.file_id)
            .map(|s| s.parts_received)
            .unwrap_or(0);
        if part.part_index != expected_index {
            tracing::warn!(
                file_id = %part.file_id,
                part_index = part.part_index,
                expected_index,
                "Out-of-sequence part, appending in arrival order"
            );
        }

        let before = match append_bytes(&staging_path, bytes).await {
            Ok(len) => len,
            Err(e) => {
                tracing::warn!(file_id = %part.file_id, "Failed to append part: {}", e);
                return fs_failure(e);
            }
        };

        let parts_received = {
            let mut session = self
                .sessions
                .entry(part.file_id.clone())
                .or_insert_with(|| UploadSession {
                    file_id: part.file_id.clone(),
                    part_count: part.part_count,
                    parts_received: 0,
                    bytes_received: 0,
                    staging_path: staging_path.clone(),
                    updated_at: Utc::now(),
                });
            session.part_count = part.part_count;
            session.parts_received += 1;
            session.bytes_received = before + bytes.len() as u64;
            session.updated_at = Utc::now();
            session.parts_received
        };

        tracing::debug!(
            file_id = %part.file_id,
            part_index = part.part_index,
            part_count = part.part_count,
            bytes = bytes.len(),
            "Part appended"
        );

        if !part.is_final() {
            return PartOutcome::Accepted { parts_received };
        }

        match self.finalize(key, part, &staging_path, naming).await {
            Ok(path) => {
                self.sessions.remove(&part.file_id);
                tracing::info!(
                    "Chunked upload {} completed: {} ({} bytes)",
                    part.file_id,
                    path.display(),
                    before + bytes.len() as u64
                );
                PartOutcome::Completed { path }
            }
            Err(e) => {
                tracing::warn!(file_id = %part.file_id, "Failed to finalize upload: {}", e);
                self.rewind(&part.file_id, &staging_path, before).await;
                fs_failure(e)
            }
        }
    }

    /// Takes back the last appended part: the staging file is cut to `len`
    /// and the session counters step back, so the same part can be resent.
    async fn rewind(&self, file_id: &str, staging_path: &Path, len: u64) {
        if let Err(e) = truncate(staging_path, len).await {
            tracing::error!("Failed to rewind staging file {}: {}", file_id, e);
        }
        if let Some(mut session) = self.sessions.get_mut(file_id) {
            session.parts_received = session.parts_received.saturating_sub(1);
            session.bytes_received = len;
            session.updated_at = Utc::now();
        }
    }

    async fn finalize(
        &self,
        key: &FolderKey,
        part: &PartHeaders,
        staging_path: &Path,
        naming: &NameOptions,
    ) -> io::Result<PathBuf> {
        let directory = key.to_path(&self.root);
        tokio::fs::create_dir_all(&directory).await?;

        let file_name = part.file_name.as_deref().unwrap_or(&part.file_id);
        let destination = filename::resolve(
            &directory,
            file_name,
            naming.base_override.as_deref(),
            naming.slugify,
        )
        .await?;

        move_file(staging_path, &destination).await?;
        Ok(destination)
    }

    /// Removes staging files untouched for longer than `max_age`, along with
    /// their sessions. Returns how many were removed.
    pub async fn sweep_stale(&self, max_age: Duration) -> io::Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.staging_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let Some(file_id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };

            let _guard = self.locks.lock(&file_id).await;
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            let age = metadata
                .modified()
                .ok()
                .and_then(|m| SystemTime::now().duration_since(m).ok())
                .unwrap_or_default();
            if age <= max_age {
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    self.sessions.remove(&file_id);
                    removed += 1;
                    tracing::info!("Removed orphaned staging file {} (idle {:?})", file_id, age);
                }
                Err(e) => tracing::error!("Failed to remove staging file {}: {}", file_id, e),
            }
        }

        self.locks.cleanup();
        tracing::debug!(removed, active = self.sessions.len(), "Staging sweep finished");
        Ok(removed)
    }
}

/// Appends `bytes` to `path`, creating it if needed. On failure the file is
/// cut back to its previous length so the same part can be sent again.
/// Returns the length before the append.
async fn append_bytes(path: &Path, bytes: &[u8]) -> io::Result<u64> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let before = file.metadata().await?.len();

    let write = async {
        file.write_all(bytes).await?;
        file.flush().await
    };
    if let Err(e) = write.await {
        let _ = file.set_len(before).await;
        return Err(e);
    }

    Ok(before)
}

async fn truncate(path: &Path, len: u64) -> io::Result<()> {
    match tokio::fs::OpenOptions::new().write(true).open(path).await {
        Ok(file) => file.set_len(len).await,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_part_headers_parse_and_decode() {
        let map = headers(&[
            ("x-file-id", "upload%2042"),
            ("x-part-index", "2"),
            ("x-part-count", "3"),
            ("x-part-size", "1024"),
            ("x-file-name", "My%20Photo.jpg"),
        ]);
        let part = PartHeaders::from_headers(&map).unwrap();
        assert_eq!(part.file_id, "upload 42");
        assert_eq!(part.part_index, 2);
        assert_eq!(part.part_count, 3);
        assert_eq!(part.part_size, 1024);
        assert_eq!(part.file_name.as_deref(), Some("My Photo.jpg"));
        assert!(part.is_final());
    }

    #[test]
    fn test_part_headers_structural_errors() {
        let base = [
            ("x-file-id", "abc"),
            ("x-part-index", "0"),
            ("x-part-count", "2"),
            ("x-part-size", "10"),
        ];

        let map = headers(&base[1..]);
        assert_eq!(
            PartHeaders::from_headers(&map),
            Err(PartHeaderError::Missing(FILE_ID_HEADER))
        );

        let mut map = headers(&base);
        map.insert("x-part-index", HeaderValue::from_static("first"));
        assert!(matches!(
            PartHeaders::from_headers(&map),
            Err(PartHeaderError::NotANumber { name: PART_INDEX_HEADER, .. })
        ));

        let mut map = headers(&base);
        map.insert("x-part-index", HeaderValue::from_static("2"));
        assert_eq!(
            PartHeaders::from_headers(&map),
            Err(PartHeaderError::IndexOutOfRange { index: 2, count: 2 })
        );

        let mut map = headers(&base);
        map.insert("x-part-count", HeaderValue::from_static("0"));
        assert_eq!(PartHeaders::from_headers(&map), Err(PartHeaderError::ZeroCount));

        // final part without a name
        let mut map = headers(&base);
        map.insert("x-part-index", HeaderValue::from_static("1"));
        assert_eq!(
            PartHeaders::from_headers(&map),
            Err(PartHeaderError::Missing(FILE_NAME_HEADER))
        );

        let mut map = headers(&base);
        map.insert("x-file-id", HeaderValue::from_static("..%2Fetc"));
        assert!(matches!(
            PartHeaders::from_headers(&map),
            Err(PartHeaderError::InvalidFileId(_))
        ));
    }

    #[test]
    fn test_check_body() {
        let part = PartHeaders::new("a", 0, 1, 3);
        assert_eq!(part.check_body(3), Ok(()));
        assert_eq!(
            part.check_body(2),
            Err(PartHeaderError::SizeMismatch { expected: 3, actual: 2 })
        );
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let root = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let assembler = ChunkAssembler::new(root.path(), staging.path());
        let key = FolderKey::parse("docs").unwrap();
        let naming = NameOptions::default();

        assert!(assembler.session("f1").is_none());

        let outcome = assembler
            .append_part(&key, &PartHeaders::new("f1", 0, 2, 3), b"abc", &naming)
            .await;
        assert_eq!(outcome, PartOutcome::Accepted { parts_received: 1 });
        assert!(assembler.staging_path("f1").exists());
        let session = assembler.session("f1").unwrap();
        assert_eq!(session.bytes_received, 3);
        assert_eq!(session.part_count, 2);

        let last = PartHeaders::new("f1", 1, 2, 2).with_file_name("notes.txt");
        let outcome = assembler.append_part(&key, &last, b"de", &naming).await;
        let PartOutcome::Completed { path } = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(path, root.path().join("docs").join("notes.txt"));
        assert_eq!(std::fs::read(&path).unwrap(), b"abcde");
        assert!(!assembler.staging_path("f1").exists());
        assert!(assembler.session("f1").is_none());
    }

    #[tokio::test]
    async fn test_sweep_stale_removes_old_staging_files() {
        let root = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let assembler = ChunkAssembler::new(root.path(), staging.path());
        let key = FolderKey::parse("docs").unwrap();

        assembler
            .append_part(&key, &PartHeaders::new("orphan", 0, 3, 1), b"x", &NameOptions::default())
            .await;

        // fresh files survive a one-hour retention
        assert_eq!(assembler.sweep_stale(Duration::from_secs(3600)).await.unwrap(), 0);
        assert!(assembler.staging_path("orphan").exists());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(assembler.sweep_stale(Duration::ZERO).await.unwrap(), 1);
        assert!(!assembler.staging_path("orphan").exists());
        assert!(assembler.session("orphan").is_none());
    }

    #[tokio::test]
    async fn test_sweep_without_staging_dir() {
        let root = tempfile::tempdir().unwrap();
        let assembler = ChunkAssembler::new(root.path(), root.path().join("missing"));
        assert_eq!(assembler.sweep_stale(Duration::ZERO).await.unwrap(), 0);
    }
}

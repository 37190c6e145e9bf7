use crate::models::{FolderError, FolderKey, FolderResult, Listing, StoredFile, UploadedFile};
use crate::services::filename;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Per-request context handed to every folder operation.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// `scheme://host[/base]` of the inbound request, used for absolute URLs.
    pub base_url: Option<String>,
    /// Cancelled when the inbound request goes away.
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(base_url: Option<String>, cancel: CancellationToken) -> Self {
        Self { base_url, cancel }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Replace whatever the folder holds with exactly one file.
    pub single: bool,
    /// Base name (without extension) to store a lone file under.
    pub base_name: Option<String>,
}

/// The four folder operations, served from local disk or a remote service.
///
/// File names passed in must already be single path components
/// (see `utils::validation::validate_file_name`).
#[async_trait]
pub trait FolderService: Send + Sync {
    async fn list(&self, key: &FolderKey, ctx: &RequestContext) -> Listing;
    async fn upload(
        &self,
        key: &FolderKey,
        files: Vec<UploadedFile>,
        options: UploadOptions,
        ctx: &RequestContext,
    ) -> FolderResult;
    async fn rename(
        &self,
        key: &FolderKey,
        file_name: &str,
        new_name: &str,
        ctx: &RequestContext,
    ) -> FolderResult;
    async fn delete(&self, key: &FolderKey, file_name: &str, ctx: &RequestContext) -> FolderResult;
    fn mode(&self) -> &'static str;
}

fn fs_error(e: io::Error) -> FolderResult {
    FolderResult::failed(FolderError::file_system(e.to_string()))
}

/// Folder operations against a physical directory tree rooted at `root`.
#[derive(Debug, Clone)]
pub struct LocalFolderStore {
    root: PathBuf,
    slugify: bool,
}

impl LocalFolderStore {
    pub fn new(root: impl Into<PathBuf>, slugify: bool) -> Self {
        Self {
            root: root.into(),
            slugify,
        }
    }

    pub fn directory(&self, key: &FolderKey) -> PathBuf {
        key.to_path(&self.root)
    }

    async fn ensure_directory(&self, key: &FolderKey) -> io::Result<PathBuf> {
        let path = self.directory(key);
        tokio::fs::create_dir_all(&path).await?;
        Ok(path)
    }

    /// Files directly inside the folder, sorted by name. A folder that does
    /// not exist yet lists as empty.
    pub async fn list_files(&self, key: &FolderKey, base_url: Option<&str>) -> Listing {
        let directory = self.directory(key);
        let mut entries = match tokio::fs::read_dir(&directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Listing::Items(Vec::new()),
            Err(e) => return Listing::Failed(vec![FolderError::file_system(e.to_string())]),
        };

        let mut files = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return Listing::Failed(vec![FolderError::file_system(e.to_string())]),
            };
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            let Ok(file_name) = entry.file_name().into_string() else {
                continue;
            };
            files.push((file_name, metadata.len() as i64));
        }
        files.sort();

        let items = files
            .into_iter()
            .enumerate()
            .map(|(index, (file_name, file_size))| {
                let url = key.virtual_path(&file_name);
                let absolute_url =
                    base_url.map(|base| format!("{}/{}", base.trim_end_matches('/'), url));
                StoredFile {
                    index,
                    file_name,
                    file_size,
                    url,
                    absolute_url,
                }
            })
            .collect();

        Listing::Items(items)
    }

    /// Saves one file, named after `base_override` when given.
    pub async fn save_one(
        &self,
        file: &UploadedFile,
        key: &FolderKey,
        base_override: Option<&str>,
        slugify: bool,
    ) -> FolderResult {
        let directory = match self.ensure_directory(key).await {
            Ok(d) => d,
            Err(e) => return fs_error(e),
        };
        save_into(&directory, file, base_override, slugify).await
    }

    /// Saves every file, one after another.
    ///
    /// Files are written strictly in sequence. Failures are collected in
    /// order; files already written stay on disk.
    pub async fn save_many(
        &self,
        files: &[UploadedFile],
        key: &FolderKey,
        single: bool,
        slugify: bool,
    ) -> FolderResult {
        if files.is_empty() {
            return FolderResult::failed(FolderError::no_file_to_upload());
        }
        if single && files.len() > 1 {
            return FolderResult::failed(FolderError::too_many_files_to_upload());
        }

        let directory = match self.ensure_directory(key).await {
            Ok(d) => d,
            Err(e) => return fs_error(e),
        };

        if single {
            if let Err(e) = clear_directory(&directory).await {
                return fs_error(e);
            }
        }

        let mut results = Vec::with_capacity(files.len());
        for file in files {
            results.push(save_into(&directory, file, None, slugify).await);
        }
        FolderResult::aggregate(results)
    }

    pub async fn rename_file(&self, key: &FolderKey, file_name: &str, new_name: &str) -> FolderResult {
        let directory = self.directory(key);
        let source = directory.join(file_name);
        let target = directory.join(new_name);

        match tokio::fs::metadata(&source).await {
            Ok(m) if m.is_file() => {}
            Ok(_) => return FolderResult::failed(FolderError::file_not_found(file_name)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return FolderResult::failed(FolderError::file_not_found(file_name));
            }
            Err(e) => return fs_error(e),
        }

        match tokio::fs::try_exists(&target).await {
            Ok(false) => {}
            Ok(true) => {
                return FolderResult::failed(FolderError::file_system(format!(
                    "A file named '{}' already exists",
                    new_name
                )));
            }
            Err(e) => return fs_error(e),
        }

        match move_file(&source, &target).await {
            Ok(()) => {
                tracing::info!("Renamed {}/{} to {}", key, file_name, new_name);
                FolderResult::Success
            }
            Err(e) => fs_error(e),
        }
    }

    /// Deleting a file that is not there succeeds.
    pub async fn delete_file(&self, key: &FolderKey, file_name: &str) -> FolderResult {
        let path = self.directory(key).join(file_name);

        match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => {}
            Ok(_) => return FolderResult::Success,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return FolderResult::Success,
            Err(e) => return fs_error(e),
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!("Deleted {}/{}", key, file_name);
                FolderResult::Success
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => FolderResult::Success,
            Err(e) => fs_error(e),
        }
    }

    /// Upload entry point shared by the HTTP routes.
    pub async fn upload_files(
        &self,
        key: &FolderKey,
        files: &[UploadedFile],
        options: &UploadOptions,
    ) -> FolderResult {
        let Some(base_name) = options.base_name.as_deref() else {
            return self.save_many(files, key, options.single, self.slugify).await;
        };

        match files {
            [] => FolderResult::failed(FolderError::no_file_to_upload()),
            [file] => {
                if options.single {
                    let directory = match self.ensure_directory(key).await {
                        Ok(d) => d,
                        Err(e) => return fs_error(e),
                    };
                    if let Err(e) = clear_directory(&directory).await {
                        return fs_error(e);
                    }
                }
                self.save_one(file, key, Some(base_name), self.slugify).await
            }
            _ => FolderResult::failed(FolderError::too_many_files_to_upload()),
        }
    }
}

#[async_trait]
impl FolderService for LocalFolderStore {
    async fn list(&self, key: &FolderKey, ctx: &RequestContext) -> Listing {
        self.list_files(key, ctx.base_url.as_deref()).await
    }

    async fn upload(
        &self,
        key: &FolderKey,
        files: Vec<UploadedFile>,
        options: UploadOptions,
        _ctx: &RequestContext,
    ) -> FolderResult {
        self.upload_files(key, &files, &options).await
    }

    async fn rename(
        &self,
        key: &FolderKey,
        file_name: &str,
        new_name: &str,
        _ctx: &RequestContext,
    ) -> FolderResult {
        self.rename_file(key, file_name, new_name).await
    }

    async fn delete(&self, key: &FolderKey, file_name: &str, _ctx: &RequestContext) -> FolderResult {
        self.delete_file(key, file_name).await
    }

    fn mode(&self) -> &'static str {
        "local"
    }
}

async fn save_into(
    directory: &Path,
    file: &UploadedFile,
    base_override: Option<&str>,
    slugify: bool,
) -> FolderResult {
    let path = match filename::resolve(directory, &file.file_name, base_override, slugify).await {
        Ok(p) => p,
        Err(e) => return fs_error(e),
    };

    match tokio::fs::write(&path, &file.data).await {
        Ok(()) => {
            tracing::info!("Saved {} ({} bytes)", path.display(), file.len());
            FolderResult::Success
        }
        Err(e) => {
            tracing::warn!("Failed to save {}: {}", path.display(), e);
            fs_error(e)
        }
    }
}

/// Deletes every regular file directly inside `directory`; stops at the
/// first failure.
async fn clear_directory(directory: &Path) -> io::Result<()> {
    let mut entries = tokio::fs::read_dir(directory).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            tokio::fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}

/// Moves a file, falling back to copy + delete across filesystems.
pub(crate) async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::codes;

    fn store(root: &Path) -> LocalFolderStore {
        LocalFolderStore::new(root, true)
    }

    #[tokio::test]
    async fn test_list_missing_folder_is_empty() {
        let root = tempfile::tempdir().unwrap();
        let key = FolderKey::parse("nothing/here").unwrap();
        assert_eq!(store(root.path()).list_files(&key, None).await, Listing::Items(vec![]));
    }

    #[tokio::test]
    async fn test_list_sorted_with_urls() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("images");
        std::fs::create_dir_all(dir.join("thumbs")).unwrap();
        std::fs::write(dir.join("b.png"), b"bb").unwrap();
        std::fs::write(dir.join("a.png"), b"a").unwrap();

        let key = FolderKey::parse("images").unwrap();
        let Listing::Items(items) = store(root.path())
            .list_files(&key, Some("https://cdn.example.com/"))
            .await
        else {
            panic!("listing failed");
        };

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].file_name, "a.png");
        assert_eq!(items[0].index, 0);
        assert_eq!(items[1].file_size, 2);
        assert_eq!(items[1].url, "images/b.png");
        assert_eq!(
            items[1].absolute_url.as_deref(),
            Some("https://cdn.example.com/images/b.png")
        );
    }

    #[tokio::test]
    async fn test_save_one_with_base_override() {
        let root = tempfile::tempdir().unwrap();
        let key = FolderKey::parse("avatars").unwrap();
        let file = UploadedFile::new("IMG_0042.JPG", &b"jpeg"[..]);

        let result = store(root.path()).save_one(&file, &key, Some("User 7"), true).await;
        assert!(result.succeeded());
        assert_eq!(std::fs::read(root.path().join("avatars/user-7.JPG")).unwrap(), b"jpeg");
    }

    #[tokio::test]
    async fn test_save_many_without_slug_keeps_names() {
        let root = tempfile::tempdir().unwrap();
        let key = FolderKey::parse("docs").unwrap();
        let files = vec![
            UploadedFile::new("Q1 Report.pdf", &b"1"[..]),
            UploadedFile::new("Q1 Report.pdf", &b"2"[..]),
        ];

        let result = store(root.path()).save_many(&files, &key, false, false).await;
        assert!(result.succeeded());
        assert_eq!(std::fs::read(root.path().join("docs/Q1 Report.pdf")).unwrap(), b"1");
        assert_eq!(std::fs::read(root.path().join("docs/Q1 Report-1.pdf")).unwrap(), b"2");
    }

    #[tokio::test]
    async fn test_rename_onto_existing_file_fails() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("docs");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.txt"), b"a").unwrap();
        std::fs::write(dir.join("b.txt"), b"b").unwrap();

        let key = FolderKey::parse("docs").unwrap();
        let result = store(root.path()).rename_file(&key, "a.txt", "b.txt").await;
        assert!(result.has_code(codes::FILE_SYSTEM_ERROR));
        assert_eq!(std::fs::read(dir.join("b.txt")).unwrap(), b"b");
    }

    #[tokio::test]
    async fn test_upload_with_base_name_requires_one_file() {
        let root = tempfile::tempdir().unwrap();
        let key = FolderKey::parse("docs").unwrap();
        let options = UploadOptions {
            single: false,
            base_name: Some("cover".to_string()),
        };
        let files = vec![
            UploadedFile::new("a.png", &b"a"[..]),
            UploadedFile::new("b.png", &b"b"[..]),
        ];

        let result = store(root.path()).upload_files(&key, &files, &options).await;
        assert!(result.has_code(codes::TO_MANY_FILES_TO_UPLOAD));

        let result = store(root.path()).upload_files(&key, &files[..1], &options).await;
        assert!(result.succeeded());
        assert!(root.path().join("docs/cover.png").exists());
    }

    #[tokio::test]
    async fn test_move_file() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("from.bin");
        let to = dir.path().join("to.bin");
        std::fs::write(&from, b"payload").unwrap();

        move_file(&from, &to).await.unwrap();
        assert!(!from.exists());
        assert_eq!(std::fs::read(&to).unwrap(), b"payload");
    }
}

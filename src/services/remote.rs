use crate::models::{FolderError, FolderKey, FolderResult, Listing, UploadedFile};
use crate::services::folder::{FolderService, RequestContext, UploadOptions};
use crate::utils::auth::{SignedToken, TIMESTAMP_HEADER, TOKEN_HEADER, TokenAuthenticator};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

pub mod actions {
    pub const LIST: &str = "list";
    pub const UPLOAD: &str = "upload";
    pub const RENAME: &str = "rename";
    pub const DELETE: &str = "delete";
}

/// Signed payloads. Both ends build them the same way, so these are shared
/// by the delegate and the signed routes that serve it.
pub mod payload {
    use crate::models::{FolderKey, UploadedFile};

    /// Sum of the file lengths. Not a content hash.
    pub fn checksum(files: &[UploadedFile]) -> u64 {
        files.iter().map(UploadedFile::len).sum()
    }

    pub fn list(key: &FolderKey) -> String {
        key.to_string()
    }

    pub fn upload(key: &FolderKey, checksum: u64) -> String {
        format!("{}{}", key, checksum)
    }

    pub fn rename(key: &FolderKey, file_name: &str, new_name: &str) -> String {
        format!("{}{}{}", key, file_name, new_name)
    }

    pub fn delete(key: &FolderKey, file_name: &str) -> String {
        format!("{}{}", key, file_name)
    }
}

/// Forwards folder operations to `{endpoint}/{action}/{key}` on a remote
/// instance of this service, signing every call.
#[derive(Debug, Clone)]
pub struct RemoteDelegate {
    client: reqwest::Client,
    endpoint: Url,
    auth: TokenAuthenticator,
}

impl RemoteDelegate {
    pub fn new(endpoint: &str, auth: TokenAuthenticator) -> anyhow::Result<Self> {
        let endpoint = Url::parse(endpoint)?;
        if endpoint.cannot_be_a_base() {
            anyhow::bail!("remote endpoint '{}' cannot take a path", endpoint);
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            auth,
        })
    }

    pub fn action_url(&self, action: &str, key: &FolderKey) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(action).extend(key.as_str().split('/'));
        }
        url
    }

    async fn send<T: DeserializeOwned>(
        &self,
        action: &str,
        request: reqwest::RequestBuilder,
        signed: SignedToken,
        ctx: &RequestContext,
    ) -> Result<T, FolderError> {
        let request = request
            .header(TIMESTAMP_HEADER, signed.timestamp.to_string())
            .header(TOKEN_HEADER, signed.token);

        let call = async {
            let response = request.send().await.map_err(|e| e.to_string())?;
            let status = response.status();
            let body = response.bytes().await.map_err(|e| e.to_string())?;

            serde_json::from_slice::<T>(&body).map_err(|e| {
                if status.is_success() {
                    format!("invalid response from remote folder service: {}", e)
                } else {
                    format!("remote folder service returned {}", status)
                }
            })
        };

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err("request cancelled".to_string()),
            result = call => result,
        };

        outcome.map_err(|message| {
            tracing::warn!("Remote '{}' call failed: {}", action, message);
            FolderError::file_system(message)
        })
    }
}

#[async_trait]
impl FolderService for RemoteDelegate {
    async fn list(&self, key: &FolderKey, ctx: &RequestContext) -> Listing {
        let signed = self.auth.generate(actions::LIST, &payload::list(key));
        let request = self.client.get(self.action_url(actions::LIST, key));

        match self.send::<Listing>(actions::LIST, request, signed, ctx).await {
            Ok(Listing::Items(mut items)) => {
                // absolute URLs point at this instance, not the remote
                if let Some(base) = ctx.base_url.as_deref() {
                    let base = base.trim_end_matches('/');
                    for item in &mut items {
                        item.absolute_url = Some(format!("{}/{}", base, item.url));
                    }
                }
                Listing::Items(items)
            }
            Ok(failed) => failed,
            Err(e) => Listing::Failed(vec![e]),
        }
    }

    async fn upload(
        &self,
        key: &FolderKey,
        files: Vec<UploadedFile>,
        options: UploadOptions,
        ctx: &RequestContext,
    ) -> FolderResult {
        let checksum = payload::checksum(&files);
        let signed = self.auth.generate(actions::UPLOAD, &payload::upload(key, checksum));

        let mut form = Form::new();
        for file in files {
            let len = file.data.len() as u64;
            let part = Part::stream_with_length(file.data, len).file_name(file.file_name);
            form = form.part("files", part);
        }

        let mut query = vec![("single", options.single.to_string())];
        if let Some(base_name) = options.base_name {
            query.push(("name", base_name));
        }

        let request = self
            .client
            .post(self.action_url(actions::UPLOAD, key))
            .query(&query)
            .multipart(form);

        self.send::<FolderResult>(actions::UPLOAD, request, signed, ctx)
            .await
            .unwrap_or_else(FolderResult::failed)
    }

    async fn rename(
        &self,
        key: &FolderKey,
        file_name: &str,
        new_name: &str,
        ctx: &RequestContext,
    ) -> FolderResult {
        let signed = self
            .auth
            .generate(actions::RENAME, &payload::rename(key, file_name, new_name));
        let request = self
            .client
            .post(self.action_url(actions::RENAME, key))
            .form(&[("fileName", file_name), ("newName", new_name)]);

        self.send::<FolderResult>(actions::RENAME, request, signed, ctx)
            .await
            .unwrap_or_else(FolderResult::failed)
    }

    async fn delete(&self, key: &FolderKey, file_name: &str, ctx: &RequestContext) -> FolderResult {
        let signed = self
            .auth
            .generate(actions::DELETE, &payload::delete(key, file_name));
        let request = self
            .client
            .post(self.action_url(actions::DELETE, key))
            .form(&[("fileName", file_name)]);

        self.send::<FolderResult>(actions::DELETE, request, signed, ctx)
            .await
            .unwrap_or_else(FolderResult::failed)
    }

    fn mode(&self) -> &'static str {
        "delegate"
    }
}

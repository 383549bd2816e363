use super::{EntryKind, RemoteEntry, RemoteFs, OP_TIMEOUT_SECS};
use crate::config::RemoteConfig;
use crate::error::RemoteError;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::debug;

const NAME_ALREADY_EXIST: &str = "NAME_ALREADY_EXIST";
const LIST_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Deserialize)]
struct ApiFile {
    id: i64,
    name: String,
    #[serde(default)]
    parent_id: Option<i64>,
    #[serde(default)]
    file_type: String,
    #[serde(default)]
    size: u64,
}

impl From<ApiFile> for RemoteEntry {
    fn from(f: ApiFile) -> Self {
        RemoteEntry {
            id: f.id,
            name: f.name,
            parent_id: f.parent_id,
            kind: if f.file_type == "FOLDER" {
                EntryKind::Folder
            } else {
                EntryKind::File
            },
            size: f.size,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    files: Vec<ApiFile>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileResponse {
    file: Option<ApiFile>,
}

#[derive(Debug, Deserialize)]
struct AccountInfoResponse {
    info: AccountInfo,
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    username: String,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

/// put.io REST 客户端
pub struct PutioClient {
    http: Client,
    api_url: String,
    upload_url: String,
    token: String,
    name: String,
}

impl PutioClient {
    pub fn new(config: &RemoteConfig, token: &str) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            upload_url: config.upload_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            name: format!("putio:{}", config.api_url),
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(format!("{}{}", self.api_url, path))
            .bearer_auth(&self.token)
            .timeout(Duration::from_secs(OP_TIMEOUT_SECS))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(format!("{}{}", self.api_url, path))
            .bearer_auth(&self.token)
            .timeout(Duration::from_secs(OP_TIMEOUT_SECS))
    }

    /// 发送请求并解析 JSON，非 2xx 时转换为 `RemoteError`
    async fn send<T: serde::de::DeserializeOwned>(req: RequestBuilder) -> Result<T, RemoteError> {
        let response = req.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(RemoteError::Unauthorized);
        }

        if !status.is_success() {
            let body: ApiErrorBody = response.json().await.unwrap_or_default();
            return Err(RemoteError::Api {
                status: status.as_u16(),
                error_type: body.error_type.unwrap_or_else(|| "UNKNOWN".to_string()),
                message: body.error_message.unwrap_or_default(),
            });
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| RemoteError::InvalidResponse(e.to_string()))
    }

    /// 查询账号用户名，用于校验令牌
    pub async fn account_username(&self) -> Result<String, RemoteError> {
        let info: AccountInfoResponse = Self::send(self.get("/account/info")).await?;
        Ok(info.info.username)
    }
}

#[async_trait]
impl RemoteFs for PutioClient {
    async fn list(&self, parent_id: i64) -> Result<Vec<RemoteEntry>, RemoteError> {
        let mut page: ListResponse = Self::send(self.get("/files/list").query(&[
            ("parent_id", parent_id.to_string()),
            ("per_page", LIST_PAGE_SIZE.to_string()),
        ]))
        .await?;

        let mut entries: Vec<RemoteEntry> = page.files.drain(..).map(Into::into).collect();

        // 分页
        while let Some(cursor) = page.cursor.take().filter(|c| !c.is_empty()) {
            page = Self::send(self.post("/files/list/continue").form(&[("cursor", cursor)])).await?;
            entries.extend(page.files.drain(..).map(RemoteEntry::from));
        }

        debug!("列出 {} 下 {} 个条目", parent_id, entries.len());
        Ok(entries)
    }

    async fn create_folder(&self, parent_id: i64, name: &str) -> Result<RemoteEntry, RemoteError> {
        let req = self.post("/files/create-folder").form(&[
            ("name", name.to_string()),
            ("parent_id", parent_id.to_string()),
        ]);

        match Self::send::<FileResponse>(req).await {
            Ok(FileResponse { file: Some(f) }) => Ok(f.into()),
            Ok(_) => Err(RemoteError::InvalidResponse("create-folder 响应缺少 file".into())),
            Err(RemoteError::Api { error_type, .. }) if error_type == NAME_ALREADY_EXIST => {
                Err(RemoteError::NameAlreadyExists {
                    name: name.to_string(),
                    parent_id,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, id: i64) -> Result<(), RemoteError> {
        Self::send::<serde_json::Value>(
            self.post("/files/delete").form(&[("file_ids", id.to_string())]),
        )
        .await?;
        Ok(())
    }

    async fn upload(&self, parent_id: i64, local_path: &Path) -> Result<RemoteEntry, RemoteError> {
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| RemoteError::InvalidResponse(format!("无效的文件路径: {:?}", local_path)))?;

        let file = tokio::fs::File::open(local_path).await?;
        let length = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let form = Form::new()
            .text("filename", file_name.clone())
            .text("parent_id", parent_id.to_string())
            .part("file", Part::stream_with_length(body, length).file_name(file_name));

        // 上传不设置整体超时
        let req = self
            .http
            .post(format!("{}/files/upload", self.upload_url))
            .bearer_auth(&self.token)
            .multipart(form);

        match Self::send::<FileResponse>(req).await? {
            FileResponse { file: Some(f) } => Ok(f.into()),
            _ => Err(RemoteError::InvalidResponse("upload 响应缺少 file".into())),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_type_maps_to_folder_kind() {
        let body = r#"{"files": [
            {"id": 1, "name": "movies", "parent_id": 0, "file_type": "FOLDER", "size": 0},
            {"id": 2, "name": "a.mkv", "parent_id": 0, "file_type": "VIDEO", "size": 42}
        ], "cursor": null, "status": "OK"}"#;

        let page: ListResponse = serde_json::from_str(body).unwrap();
        let entries: Vec<RemoteEntry> = page.files.into_iter().map(Into::into).collect();

        assert!(entries[0].is_dir());
        assert_eq!(entries[1].kind, EntryKind::File);
        assert_eq!(entries[1].size, 42);
        assert!(page.cursor.is_none());
    }

    #[test]
    fn client_trims_trailing_slashes() {
        let config = RemoteConfig {
            api_url: "https://api.example/v2/".into(),
            ..Default::default()
        };
        let client = PutioClient::new(&config, "t").unwrap();
        assert_eq!(client.api_url, "https://api.example/v2");
        assert_eq!(client.name(), "putio:https://api.example/v2/");
    }
}

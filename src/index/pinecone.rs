use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tokio::time::sleep;

use super::{ImageRecord, Metadata, MetadataFilter, QueryMatch, VectorIndex};

const API_VERSION: &str = "2024-07";

/// Pinecone 连接参数
#[derive(Debug, Clone)]
pub struct PineconeConfig {
    pub api_key: String,
    /// 控制面地址，例如 `https://api.pinecone.io`
    pub controller_url: String,
    pub index_name: String,
    pub dimension: usize,
    pub metric: String,
    pub cloud: String,
    pub region: String,
    /// 单次 upsert 请求的最大向量数量
    pub upsert_batch_size: usize,
    /// 等待索引就绪的最长时间
    pub ready_timeout: Duration,
}

/// Pinecone serverless 索引的 REST 客户端
pub struct PineconeIndex {
    client: Client,
    config: PineconeConfig,
    host: OnceCell<String>,
}

#[derive(Debug, Deserialize)]
struct IndexList {
    #[serde(default)]
    indexes: Vec<IndexModel>,
}

#[derive(Debug, Deserialize)]
struct IndexModel {
    name: String,
    #[serde(default)]
    host: String,
    #[serde(default)]
    status: IndexStatus,
}

#[derive(Debug, Default, Deserialize)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Serialize)]
struct CreateIndexRequest<'a> {
    name: &'a str,
    dimension: usize,
    metric: &'a str,
    spec: Value,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [ImageRecord],
    namespace: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    namespace: &'a str,
    vector: &'a [f32],
    top_k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Value>,
    include_values: bool,
    include_metadata: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<MatchModel>,
}

#[derive(Debug, Deserialize)]
struct MatchModel {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Metadata>,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    ids: &'a [String],
    namespace: &'a str,
}

impl PineconeIndex {
    pub fn new(config: PineconeConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            bail!("未设置 Pinecone API key");
        }
        let client = Client::builder().build()?;
        Ok(Self { client, config, host: OnceCell::new() })
    }

    fn controller(&self, path: &str) -> String {
        format!("{}{}", self.config.controller_url.trim_end_matches('/'), path)
    }

    fn with_headers(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Api-Key", &self.config.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    async fn list_indexes(&self) -> Result<Vec<IndexModel>> {
        let response = self.with_headers(self.client.get(self.controller("/indexes"))).send().await?;
        let list: IndexList = check_status(response).await?.json().await?;
        Ok(list.indexes)
    }

    async fn describe_index(&self) -> Result<IndexModel> {
        let url = self.controller(&format!("/indexes/{}", self.config.index_name));
        let response = self.with_headers(self.client.get(url)).send().await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn create_index(&self) -> Result<()> {
        let request = CreateIndexRequest {
            name: &self.config.index_name,
            dimension: self.config.dimension,
            metric: &self.config.metric,
            spec: serverless_spec(&self.config.cloud, &self.config.region),
        };
        let response = self
            .with_headers(self.client.post(self.controller("/indexes")))
            .json(&request)
            .send()
            .await?;
        // 并发创建时可能已被其他进程创建
        if response.status() == StatusCode::CONFLICT {
            debug!("索引 {} 已存在", self.config.index_name);
            return Ok(());
        }
        check_status(response).await?;
        Ok(())
    }

    async fn wait_until_ready(&self) -> Result<IndexModel> {
        let start = Instant::now();
        loop {
            let model = self.describe_index().await?;
            if model.status.ready {
                return Ok(model);
            }
            if start.elapsed() > self.config.ready_timeout {
                bail!("等待索引 {} 就绪超时，当前状态: {}", model.name, model.status.state);
            }
            debug!("索引 {} 状态: {}", model.name, model.status.state);
            sleep(Duration::from_secs(1)).await;
        }
    }

    /// 数据面地址，首次使用时通过 describe 获取
    async fn host(&self) -> Result<&str> {
        let host = self
            .host
            .get_or_try_init(|| async {
                let model = self.describe_index().await?;
                if model.host.is_empty() {
                    return Err(anyhow!("索引 {} 尚未分配 host", model.name));
                }
                Ok(normalize_host(&model.host))
            })
            .await?;
        Ok(host.as_str())
    }

    async fn data_plane(&self, path: &str, body: &impl Serialize) -> Result<Response> {
        let url = format!("{}{}", self.host().await?, path);
        let response = self.with_headers(self.client.post(url)).json(body).send().await?;
        check_status(response).await
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn ensure_index(&self) -> Result<()> {
        let indexes = self.list_indexes().await?;
        debug!("已有索引: {:?}", indexes.iter().map(|i| &i.name).collect::<Vec<_>>());

        if !indexes.iter().any(|i| i.name == self.config.index_name) {
            info!(
                "创建索引 {}: {} 维, {}/{}",
                self.config.index_name, self.config.dimension, self.config.cloud, self.config.region
            );
            self.create_index().await?;
        }

        let model = self.wait_until_ready().await?;
        if !model.host.is_empty() {
            let _ = self.host.set(normalize_host(&model.host));
        }
        Ok(())
    }

    async fn upsert(&self, records: &[ImageRecord], namespace: &str) -> Result<()> {
        for batch in records.chunks(self.config.upsert_batch_size.max(1)) {
            self.data_plane("/vectors/upsert", &UpsertRequest { vectors: batch, namespace })
                .await
                .context("写入向量失败")?;
            debug!("写入 {} 条向量到 {}", batch.len(), namespace);
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
        namespace: &str,
    ) -> Result<Vec<QueryMatch>> {
        let request = QueryRequest {
            namespace,
            vector,
            top_k,
            filter: filter.map(MetadataFilter::to_json),
            include_values: false,
            include_metadata: true,
        };
        let response: QueryResponse =
            self.data_plane("/query", &request).await.context("查询向量失败")?.json().await?;

        let mut matches = response
            .matches
            .into_iter()
            .map(|m| QueryMatch { id: m.id, score: m.score, metadata: m.metadata })
            .collect::<Vec<_>>();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete(&self, ids: &[String], namespace: &str) -> Result<()> {
        self.data_plane("/vectors/delete", &DeleteRequest { ids, namespace })
            .await
            .context("删除向量失败")?;
        Ok(())
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(anyhow!("Pinecone 请求失败 {}: {}", status, body))
}

fn serverless_spec(cloud: &str, region: &str) -> Value {
    serde_json::json!({ "serverless": { "cloud": cloud, "region": region } })
}

fn normalize_host(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_owned()
    } else {
        format!("https://{}", host.trim_end_matches('/'))
    }
}

use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::EmbeddingModel;

/// 多模态嵌入服务的连接参数
#[derive(Debug, Clone)]
pub struct HttpModelConfig {
    /// 服务地址，请求发送到 `{url}/v1/embeddings`
    pub url: String,
    pub api_key: Option<String>,
    /// 模型名称
    pub model: String,
    /// 期望的输出维度
    pub dimension: usize,
    pub timeout: Duration,
}

/// 通过 HTTP 调用的多模态嵌入模型（Jina / CLIP 服务兼容的接口）
pub struct HttpEmbeddingModel {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum Input {
    Image(String),
    Text(String),
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    dimensions: usize,
    input: Vec<Input>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl HttpEmbeddingModel {
    pub fn new(config: HttpModelConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/embeddings", config.url.trim_end_matches('/')),
            api_key: config.api_key,
            model: config.model,
            dimension: config.dimension,
        })
    }

    async fn embed_one(&self, input: Input) -> Result<Vec<f32>> {
        let request =
            EmbedRequest { model: &self.model, dimensions: self.dimension, input: vec![input] };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("嵌入服务返回错误 {}: {}", status, body);
        }

        let response: EmbedResponse = response.json().await?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow!("嵌入服务返回了空结果"))
    }
}

#[async_trait]
impl EmbeddingModel for HttpEmbeddingModel {
    async fn embed_image(&self, image: &[u8]) -> Result<Vec<f32>> {
        self.embed_one(Input::Image(STANDARD.encode(image))).await
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one(Input::Text(text.to_owned())).await
    }
}

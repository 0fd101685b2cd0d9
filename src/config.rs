use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use regex::Regex;

use crate::cli::*;
use crate::embedding::{EmbeddingWeights, HttpEmbeddingModel, HttpModelConfig, ImageEmbedder};
use crate::folder::ImageFolder;
use crate::index::{MemoryIndex, PineconeConfig, PineconeIndex, VectorIndex};
use crate::searcher::{ImageSearch, ImageSearchBuilder, ImageSelection};

#[derive(Parser, Debug, Clone)]
#[command(name = "image-search", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 本地图片目录
    #[arg(short, long, env = "IMAGE_SOURCE_FOLDER", default_value = "./data", global = true)]
    pub source_folder: PathBuf,
    /// 图片后缀名，多个后缀用逗号分隔
    #[arg(long, default_value = "jpg,jpeg,png,webp,gif", global = true)]
    pub suffix: String,
}

impl Opts {
    pub fn folder(&self) -> Result<ImageFolder> {
        ImageFolder::new(&self.source_folder, &self.suffix)
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 启动 HTTP 服务
    Serve(ServerCommand),
    /// 嵌入目录下的图片并写入向量库
    Index(IndexCommand),
    /// 以图搜图
    Search(SearchCommand),
    /// 列出本地图片
    List(ListCommand),
}

/// 嵌入模型选项
#[derive(Parser, Debug, Clone)]
pub struct ModelOptions {
    /// 多模态嵌入服务地址
    #[arg(long, env = "EMBEDDING_URL", default_value = "http://127.0.0.1:8080")]
    pub embedding_url: String,
    /// 嵌入服务的 API key
    #[arg(long, env = "EMBEDDING_API_KEY", hide_env_values = true)]
    pub embedding_api_key: Option<String>,
    /// 模型名称
    #[arg(long, env = "MODEL_NAME", default_value = "jina-clip-v2")]
    pub model_name: String,
    /// 模型输出向量维度
    #[arg(long, env = "MODEL_DIMENSION_SIZE", default_value_t = 512)]
    pub dimension: usize,
    /// 图片向量的混合权重
    #[arg(long, value_name = "WEIGHT", default_value_t = 0.3)]
    pub image_weight: f32,
    /// 文本向量的混合权重
    #[arg(long, value_name = "WEIGHT", default_value_t = 0.7)]
    pub text_weight: f32,
    /// 嵌入请求超时时间，单位为秒
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub embedding_timeout: u64,
}

impl ModelOptions {
    pub fn embedder(&self) -> Result<ImageEmbedder> {
        let model = HttpEmbeddingModel::new(HttpModelConfig {
            url: self.embedding_url.clone(),
            api_key: self.embedding_api_key.clone(),
            model: self.model_name.clone(),
            dimension: self.dimension,
            timeout: Duration::from_secs(self.embedding_timeout),
        })?;
        let weights = EmbeddingWeights { image: self.image_weight, text: self.text_weight };
        Ok(ImageEmbedder::new(Arc::new(model), self.dimension, weights))
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBackend {
    /// Pinecone serverless 索引
    Pinecone,
    /// 进程内索引，重启后丢失
    Memory,
}

/// 向量库选项
#[derive(Parser, Debug, Clone)]
pub struct IndexOptions {
    /// 向量库类型
    #[arg(long, value_enum, env = "INDEX_BACKEND", default_value_t = IndexBackend::Pinecone)]
    pub backend: IndexBackend,
    /// 索引名称
    #[arg(long, env = "PINECONE_INDEX", default_value = "image-search")]
    pub index_name: String,
    /// Pinecone API key
    #[arg(long, env = "PINECONE_API_KEY", default_value_t = String::new(), hide_env_values = true)]
    pub api_key: String,
    /// Pinecone 控制面地址
    #[arg(long, env = "PINECONE_CONTROLLER_URL", default_value = "https://api.pinecone.io")]
    pub controller_url: String,
    /// 索引所在的云服务商
    #[arg(long, env = "PINECONE_CLOUD", default_value = "aws")]
    pub cloud: String,
    /// 索引所在区域
    #[arg(long, env = "PINECONE_REGION", default_value = "us-east-1")]
    pub region: String,
    /// 索引命名空间
    #[arg(long, env = "PINECONE_INDEX_NAMESPACE", default_value = "default")]
    pub namespace: String,
    /// 相似度度量
    #[arg(long, default_value = "cosine")]
    pub metric: String,
    /// 单次 upsert 请求的最大向量数量
    #[arg(long, value_name = "SIZE", default_value_t = 10)]
    pub upsert_batch_size: usize,
    /// 等待索引就绪的最长时间，单位为秒
    #[arg(long, value_name = "SECS", default_value_t = 300)]
    pub ready_timeout: u64,
}

impl IndexOptions {
    pub fn index(&self, dimension: usize) -> Result<Arc<dyn VectorIndex>> {
        Ok(match self.backend {
            IndexBackend::Pinecone => Arc::new(PineconeIndex::new(PineconeConfig {
                api_key: self.api_key.clone(),
                controller_url: self.controller_url.clone(),
                index_name: self.index_name.clone(),
                dimension,
                metric: self.metric.clone(),
                cloud: self.cloud.clone(),
                region: self.region.clone(),
                upsert_batch_size: self.upsert_batch_size,
                ready_timeout: Duration::from_secs(self.ready_timeout),
            })?),
            IndexBackend::Memory => Arc::new(MemoryIndex::new(&self.index_name, dimension)),
        })
    }
}

/// 搜索与批处理选项
#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 返回的结果数量
    #[arg(long, value_name = "K", default_value_t = 6)]
    pub top_k: usize,
    /// 搜索时按名称过滤结果，而不仅仅用名称影响向量
    #[arg(long, env = "FILTER_BY_NAME")]
    pub filter_by_name: bool,
    /// 每个批次嵌入并写入的图片数量
    #[arg(long, value_name = "SIZE", default_value_t = 100, value_parser = clap::value_parser!(u32).range(1..))]
    pub chunk_size: u32,
}

/// 嵌入服务和向量库的完整配置
#[derive(Parser, Debug, Clone)]
pub struct ServiceOptions {
    #[command(flatten)]
    pub model: ModelOptions,
    #[command(flatten)]
    pub index: IndexOptions,
    #[command(flatten)]
    pub search: SearchOptions,
}

impl ServiceOptions {
    /// 构造客户端，并确保索引存在
    pub async fn open(&self, opts: &Opts) -> Result<ImageSearch> {
        let embedder = self.model.embedder()?;
        let index = self.index.index(embedder.dimension())?;
        ImageSearchBuilder::new(opts.folder()?, embedder, index)
            .namespace(&self.index.namespace)
            .chunk_size(self.search.chunk_size as usize)
            .top_k(self.search.top_k)
            .filter_by_name(self.search.filter_by_name)
            .open()
            .await
    }
}

/// 选择需要索引的图片
#[derive(Parser, Debug, Clone)]
pub struct SelectionOptions {
    /// 只索引路径匹配该正则的图片
    #[arg(long, value_name = "REGEX")]
    pub include: Option<String>,
    /// 最多索引的图片数量
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,
}

impl SelectionOptions {
    pub fn selection(&self) -> Result<ImageSelection> {
        let include = self
            .include
            .as_deref()
            .map(Regex::new)
            .transpose()
            .context("无效的 --include 正则")?;
        Ok(ImageSelection { include, limit: self.limit })
    }
}

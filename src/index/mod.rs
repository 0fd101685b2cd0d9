mod memory;
mod pinecone;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub use memory::MemoryIndex;
pub use pinecone::{PineconeConfig, PineconeIndex};

/// 图片向量的元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// 图片路径
    pub image_path: String,
    /// 图片名称，同时作为嵌入时的文本提示
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Metadata {
    /// 读取元数据中的某个字段，用于等值过滤
    pub fn field(&self, key: &str) -> Option<&str> {
        match key {
            "imagePath" => Some(&self.image_path),
            "name" => self.name.as_deref(),
            _ => None,
        }
    }
}

/// 向量库中的一条记录，相同 id 的记录会被覆盖
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Metadata,
}

/// 查询命中的记录
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Option<Metadata>,
}

/// 元数据等值过滤：`{field: {"$eq": value}}`
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataFilter {
    pub field: String,
    pub value: String,
}

impl MetadataFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self { field: field.into(), value: value.into() }
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        metadata.field(&self.field) == Some(self.value.as_str())
    }

    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert(self.field.clone(), json!({ "$eq": &self.value }));
        Value::Object(map)
    }
}

/// 托管向量库的抽象
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// 索引不存在时创建，并等待其就绪。重复调用不会创建第二个索引
    async fn ensure_index(&self) -> Result<()>;

    /// 写入一批记录，按 id 覆盖
    async fn upsert(&self, records: &[ImageRecord], namespace: &str) -> Result<()>;

    /// 返回至多 `top_k` 个最相似的记录，按分数降序排列
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
        namespace: &str,
    ) -> Result<Vec<QueryMatch>>;

    /// 按 id 删除记录
    async fn delete(&self, ids: &[String], namespace: &str) -> Result<()>;
}

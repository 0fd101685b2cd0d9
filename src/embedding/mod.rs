mod http;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use log::debug;

pub use self::http::{HttpEmbeddingModel, HttpModelConfig};
use crate::index::{ImageRecord, Metadata};

/// 预训练的多模态模型，图片和文本被映射到同一个向量空间
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn embed_image(&self, image: &[u8]) -> Result<Vec<f32>>;

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;
}

/// 图片向量与文本向量的混合权重
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmbeddingWeights {
    pub image: f32,
    pub text: f32,
}

impl Default for EmbeddingWeights {
    fn default() -> Self {
        Self { image: 0.3, text: 0.7 }
    }
}

/// 将图片（和可选的文本提示）转换为向量库记录
#[derive(Clone)]
pub struct ImageEmbedder {
    model: Arc<dyn EmbeddingModel>,
    dimension: usize,
    weights: EmbeddingWeights,
}

impl ImageEmbedder {
    pub fn new(model: Arc<dyn EmbeddingModel>, dimension: usize, weights: EmbeddingWeights) -> Self {
        Self { model, dimension, weights }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 嵌入一张图片。提示非空时，结果为图片向量与文本向量的加权和
    pub async fn embed(&self, image_path: &str, hint: Option<&str>) -> Result<ImageRecord> {
        let data = tokio::fs::read(image_path)
            .await
            .with_context(|| format!("读取图片失败: {image_path}"))?;
        let image = self.model.embed_image(&data).await?;
        self.check_dimension(&image)?;

        let hint = hint.map(str::trim).filter(|h| !h.is_empty());
        let values = match hint {
            Some(text) => {
                let text_vec = self.model.embed_text(text).await?;
                self.check_dimension(&text_vec)?;
                combine(&image, &text_vec, self.weights)
            }
            None => l2_normalize(image),
        };
        debug!("嵌入图片 {image_path}，提示: {hint:?}");

        Ok(ImageRecord {
            id: record_id(image_path),
            values,
            metadata: Metadata {
                image_path: image_path.to_owned(),
                name: hint.map(str::to_owned),
            },
        })
    }

    /// 嵌入一张图片，使用文件名推导出的名称作为提示
    pub async fn embed_named(&self, image_path: &str) -> Result<ImageRecord> {
        let name = image_name(image_path);
        self.embed(image_path, name.as_deref()).await
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        ensure!(
            vector.len() == self.dimension,
            "模型输出维度 {} 与配置的维度 {} 不一致",
            vector.len(),
            self.dimension
        );
        Ok(())
    }
}

/// 记录 ID：图片路径的 blake3 哈希，取前 32 个十六进制字符
pub fn record_id(image_path: &str) -> String {
    let hash = blake3::hash(image_path.as_bytes());
    hash.to_hex()[..32].to_owned()
}

/// 从文件名推导图片名称，例如 `Bulbasaur-00000000_png.rf.xxx.jpg` → `Bulbasaur`
pub fn image_name(image_path: &str) -> Option<String> {
    let stem = Path::new(image_path).file_stem()?.to_string_lossy();
    let name = stem.split('-').next().unwrap_or_default().trim();
    if name.is_empty() { None } else { Some(name.to_owned()) }
}

fn combine(image: &[f32], text: &[f32], weights: EmbeddingWeights) -> Vec<f32> {
    let mixed = image
        .iter()
        .zip(text)
        .map(|(i, t)| weights.image * i + weights.text * t)
        .collect::<Vec<_>>();
    l2_normalize(mixed)
}

pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0. {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

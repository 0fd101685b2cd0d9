use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, ensure};
use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::RwLock;

use super::{ImageRecord, MetadataFilter, QueryMatch, VectorIndex};

/// 进程内的暴力搜索索引，使用余弦相似度，用于离线演示和测试
pub struct MemoryIndex {
    name: String,
    dimension: usize,
    ready: AtomicBool,
    creations: AtomicUsize,
    namespaces: RwLock<HashMap<String, HashMap<String, ImageRecord>>>,
}

impl MemoryIndex {
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
            ready: AtomicBool::new(false),
            creations: AtomicUsize::new(0),
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    /// 索引被实际创建的次数
    pub fn creations(&self) -> usize {
        self.creations.load(Ordering::SeqCst)
    }

    /// 某个命名空间中的记录数量
    pub async fn len(&self, namespace: &str) -> usize {
        self.namespaces.read().await.get(namespace).map_or(0, HashMap::len)
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn ensure_index(&self) -> Result<()> {
        if self.ready.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            info!("创建内存索引: {} ({} 维)", self.name, self.dimension);
            self.creations.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn upsert(&self, records: &[ImageRecord], namespace: &str) -> Result<()> {
        ensure!(self.ready.load(Ordering::SeqCst), "索引 {} 不存在", self.name);
        for record in records {
            ensure!(
                record.values.len() == self.dimension,
                "向量维度不匹配: {} != {}",
                record.values.len(),
                self.dimension
            );
        }

        let mut namespaces = self.namespaces.write().await;
        let entries = namespaces.entry(namespace.to_owned()).or_default();
        for record in records {
            entries.insert(record.id.clone(), record.clone());
        }
        debug!("写入 {} 条记录到 {}/{}", records.len(), self.name, namespace);
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
        namespace: &str,
    ) -> Result<Vec<QueryMatch>> {
        ensure!(self.ready.load(Ordering::SeqCst), "索引 {} 不存在", self.name);
        ensure!(vector.len() == self.dimension, "查询向量维度不匹配: {}", vector.len());

        let namespaces = self.namespaces.read().await;
        let Some(entries) = namespaces.get(namespace) else {
            return Ok(vec![]);
        };

        let mut matches = entries
            .values()
            .filter(|record| filter.is_none_or(|f| f.matches(&record.metadata)))
            .map(|record| QueryMatch {
                id: record.id.clone(),
                score: cosine_similarity(vector, &record.values),
                metadata: Some(record.metadata.clone()),
            })
            .collect::<Vec<_>>();
        matches.sort_unstable_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(top_k);

        Ok(matches)
    }

    async fn delete(&self, ids: &[String], namespace: &str) -> Result<()> {
        let mut namespaces = self.namespaces.write().await;
        if let Some(entries) = namespaces.get_mut(namespace) {
            for id in ids {
                entries.remove(id);
            }
        }
        Ok(())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot = a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0. || norm_b == 0. {
        return 0.;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use rstest::*;

    use super::*;
    use crate::index::Metadata;

    const NS: &str = "default";

    fn record(id: &str, values: Vec<f32>, name: &str) -> ImageRecord {
        ImageRecord {
            id: id.to_owned(),
            values,
            metadata: Metadata {
                image_path: format!("data/{id}.png"),
                name: Some(name.to_owned()),
            },
        }
    }

    #[fixture]
    async fn index() -> MemoryIndex {
        let index = MemoryIndex::new("test", 3);
        index.ensure_index().await.unwrap();
        index
            .upsert(
                &[
                    record("a", vec![1., 0., 0.], "Bulbasaur"),
                    record("b", vec![0.9, 0.1, 0.], "Chansey"),
                    record("c", vec![0., 1., 0.], "Bulbasaur"),
                    record("d", vec![0., 0., 1.], "Beedrill"),
                ],
                NS,
            )
            .await
            .unwrap();
        index
    }

    #[rstest]
    #[tokio::test]
    async fn test_ensure_index_is_idempotent() {
        let index = MemoryIndex::new("test", 3);
        index.ensure_index().await.unwrap();
        index.ensure_index().await.unwrap();
        assert_eq!(index.creations(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ensure_creates_once() {
        let index = std::sync::Arc::new(MemoryIndex::new("test", 3));
        let tasks = (0..16)
            .map(|_| {
                let index = index.clone();
                tokio::spawn(async move { index.ensure_index().await })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(index.creations(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn test_upsert_requires_index() {
        let index = MemoryIndex::new("test", 3);
        assert!(index.upsert(&[record("a", vec![1., 0., 0.], "x")], NS).await.is_err());
    }

    #[rstest]
    #[tokio::test]
    async fn test_upsert_overwrites_same_id(#[future] index: MemoryIndex) {
        let index = index.await;
        index.upsert(&[record("a", vec![0., 0., 1.], "Beedrill")], NS).await.unwrap();
        assert_eq!(index.len(NS).await, 4);

        let result = index.query(&[0., 0., 1.], 2, None, NS).await.unwrap();
        let ids = result.iter().map(|m| m.id.as_str()).collect::<Vec<_>>();
        assert!(ids.contains(&"a"));
        assert!(ids.contains(&"d"));
    }

    #[rstest]
    #[tokio::test]
    async fn test_query_sorted_and_bounded(#[future] index: MemoryIndex) {
        let index = index.await;
        let result = index.query(&[1., 0., 0.], 3, None, NS).await.unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(result[0].id, "a");
        assert_eq!(result[1].id, "b");
        assert!(result.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[rstest]
    #[tokio::test]
    async fn test_query_with_filter(#[future] index: MemoryIndex) {
        let index = index.await;
        let filter = MetadataFilter::eq("name", "Bulbasaur");
        let result = index.query(&[0., 1., 0.], 6, Some(&filter), NS).await.unwrap();
        let ids = result.iter().map(|m| m.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, ["c", "a"]);
    }

    #[rstest]
    #[tokio::test]
    async fn test_query_empty_namespace(#[future] index: MemoryIndex) {
        let index = index.await;
        assert!(index.query(&[1., 0., 0.], 6, None, "other").await.unwrap().is_empty());
        let filter = MetadataFilter::eq("name", "Pikachu");
        assert!(index.query(&[1., 0., 0.], 6, Some(&filter), NS).await.unwrap().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn test_delete(#[future] index: MemoryIndex) {
        let index = index.await;
        index.delete(&["a".to_owned()], NS).await.unwrap();
        let result = index.query(&[1., 0., 0.], 6, None, NS).await.unwrap();
        assert_eq!(result.len(), 3);
        assert!(result.iter().all(|m| m.id != "a"));
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1., 0.], &[2., 0.]) - 1.).abs() < 1e-6);
        assert!(cosine_similarity(&[1., 0.], &[0., 1.]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0., 0.], &[0., 1.]), 0.);
    }
}

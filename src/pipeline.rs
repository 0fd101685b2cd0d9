use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, ensure};
use futures::future::try_join_all;
use log::{debug, info};

use crate::embedding::ImageEmbedder;
use crate::index::VectorIndex;
use crate::metrics;

/// 将迭代器按固定大小惰性切分，最后一块可能不足 `size`
pub struct Chunks<I: Iterator> {
    iter: I,
    size: usize,
}

impl<I: Iterator> Iterator for Chunks<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.iter.by_ref().take(self.size).collect::<Vec<_>>();
        if chunk.is_empty() { None } else { Some(chunk) }
    }
}

/// 按 `size` 切分，`size` 必须大于 0
pub fn chunked<I: IntoIterator>(iter: I, size: usize) -> Result<Chunks<I::IntoIter>> {
    ensure!(size > 0, "chunk size 必须大于 0");
    Ok(Chunks { iter: iter.into_iter(), size })
}

/// 每完成一个分块时的进度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkReport {
    /// 分块序号，从 0 开始
    pub index: usize,
    /// 本分块的图片数量
    pub size: usize,
    /// 已经写入索引的图片总数
    pub completed: usize,
    /// 本次需要写入的图片总数
    pub total: usize,
}

/// 分块嵌入并写入向量库
///
/// 分块之间严格串行：上一块写入完成后才会开始下一块；块内的图片并发嵌入。
/// 出错时立即返回，已经写入的分块不会回滚。
#[derive(Clone)]
pub struct Pipeline {
    embedder: ImageEmbedder,
    index: Arc<dyn VectorIndex>,
    namespace: String,
    chunk_size: usize,
}

impl Pipeline {
    pub fn new(
        embedder: ImageEmbedder,
        index: Arc<dyn VectorIndex>,
        namespace: impl Into<String>,
        chunk_size: usize,
    ) -> Self {
        Self { embedder, index, namespace: namespace.into(), chunk_size }
    }

    /// 返回写入的记录总数
    pub async fn run<F>(&self, image_paths: Vec<String>, mut on_chunk: F) -> Result<usize>
    where
        F: FnMut(ChunkReport),
    {
        let total = image_paths.len();
        let mut completed = 0;

        for (index, chunk) in chunked(image_paths, self.chunk_size)?.enumerate() {
            let start = Instant::now();
            let records = try_join_all(chunk.iter().map(|path| self.embedder.embed_named(path)))
                .await
                .with_context(|| format!("第 {} 个分块嵌入失败", index + 1))?;
            metrics::inc_embedded_images(records.len());

            self.index
                .upsert(&records, &self.namespace)
                .await
                .with_context(|| format!("第 {} 个分块写入失败", index + 1))?;
            metrics::observe_chunk_duration(start.elapsed().as_secs_f32());

            completed += records.len();
            debug!("分块 {} 完成: {} 张图片, 耗时 {:.2}s", index, records.len(), start.elapsed().as_secs_f32());
            on_chunk(ChunkReport { index, size: records.len(), completed, total });
        }

        info!("写入完成，共 {}/{} 张图片", completed, total);
        Ok(completed)
    }
}

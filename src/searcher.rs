use std::sync::Arc;

use anyhow::{Result, anyhow};
use log::{debug, error, info};
use regex::Regex;
use serde::Serialize;
use utoipa::ToSchema;

use crate::embedding::{ImageEmbedder, image_name};
use crate::folder::{ImageFolder, InvalidRequest};
use crate::index::{MetadataFilter, VectorIndex};
use crate::metrics;
use crate::pipeline::{ChunkReport, Pipeline};

/// 搜索结果
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SearchResult {
    /// 记录 ID
    pub id: String,
    /// 图片路径
    pub src: String,
    /// 相似度，越大越相似
    pub score: f32,
    /// 图片名称
    pub name: String,
}

/// 选择需要索引的图片
#[derive(Debug, Clone, Default)]
pub struct ImageSelection {
    /// 只索引路径匹配该正则的图片
    pub include: Option<Regex>,
    /// 最多索引的图片数量
    pub limit: Option<usize>,
}

impl ImageSelection {
    pub fn apply(&self, paths: Vec<String>) -> Vec<String> {
        let iter = paths
            .into_iter()
            .filter(|p| self.include.as_ref().is_none_or(|re| re.is_match(p)));
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

/// 组合本地图片目录、嵌入模型和向量库
pub struct ImageSearch {
    folder: ImageFolder,
    embedder: ImageEmbedder,
    index: Arc<dyn VectorIndex>,
    namespace: String,
    chunk_size: usize,
    top_k: usize,
    filter_by_name: bool,
}

pub struct ImageSearchBuilder {
    folder: ImageFolder,
    embedder: ImageEmbedder,
    index: Arc<dyn VectorIndex>,
    namespace: String,
    chunk_size: usize,
    top_k: usize,
    filter_by_name: bool,
    ensure_index: bool,
}

impl ImageSearchBuilder {
    pub fn new(folder: ImageFolder, embedder: ImageEmbedder, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            folder,
            embedder,
            index,
            namespace: "default".to_owned(),
            chunk_size: 100,
            top_k: 6,
            filter_by_name: false,
            ensure_index: true,
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// 搜索时是否按名称过滤结果
    pub fn filter_by_name(mut self, filter_by_name: bool) -> Self {
        self.filter_by_name = filter_by_name;
        self
    }

    /// 打开时是否确保索引存在
    pub fn ensure_index(mut self, ensure_index: bool) -> Self {
        self.ensure_index = ensure_index;
        self
    }

    pub async fn open(self) -> Result<ImageSearch> {
        if self.ensure_index {
            self.index.ensure_index().await?;
        }
        Ok(ImageSearch {
            folder: self.folder,
            embedder: self.embedder,
            index: self.index,
            namespace: self.namespace,
            chunk_size: self.chunk_size,
            top_k: self.top_k,
            filter_by_name: self.filter_by_name,
        })
    }
}

impl ImageSearch {
    pub fn folder(&self) -> &ImageFolder {
        &self.folder
    }

    fn pipeline(&self) -> Pipeline {
        Pipeline::new(
            self.embedder.clone(),
            self.index.clone(),
            self.namespace.clone(),
            self.chunk_size,
        )
    }

    /// 列出本地图片
    pub async fn list(&self) -> Result<Vec<String>> {
        self.folder.list().await
    }

    /// 嵌入目录下被选中的图片并写入向量库，返回写入数量
    pub async fn index_all<F>(&self, selection: &ImageSelection, on_chunk: F) -> Result<usize>
    where
        F: FnMut(ChunkReport),
    {
        self.index.ensure_index().await?;
        let paths = selection.apply(self.folder.list().await?);
        info!("开始索引 {} 张图片", paths.len());
        self.pipeline().run(paths, on_chunk).await
    }

    /// 以图搜图，`name` 作为文本提示参与嵌入；未指定时使用文件名推导出的名称，与索引时一致
    pub async fn search(&self, image_path: &str, name: Option<&str>) -> Result<Vec<SearchResult>> {
        self.folder.check(image_path).await?;
        let name = name.map(str::trim).filter(|n| !n.is_empty());

        let hint = name.map(str::to_owned).or_else(|| image_name(image_path));
        let record = self.embedder.embed(image_path, hint.as_deref()).await?;
        let filter = match name {
            Some(name) if self.filter_by_name => Some(MetadataFilter::eq("name", name)),
            _ => None,
        };
        let matches =
            self.index.query(&record.values, self.top_k, filter.as_ref(), &self.namespace).await?;
        debug!("搜索 {image_path} 命中 {} 条", matches.len());

        if let Some(best) = matches.first() {
            metrics::observe_search_max_score(best.score);
        }

        Ok(matches
            .into_iter()
            .map(|m| {
                let (src, name) = match m.metadata {
                    Some(metadata) => (metadata.image_path, metadata.name.unwrap_or_default()),
                    None => (String::new(), String::new()),
                };
                SearchResult { id: m.id, src, score: m.score, name }
            })
            .collect())
    }

    /// 保存上传的图片并立即写入向量库，返回保存后的路径
    pub async fn upload<B: AsRef<[u8]>>(&self, files: &[(Option<String>, B)]) -> Result<Vec<String>> {
        if files.is_empty() {
            return Err(InvalidRequest("No files uploaded".to_owned()).into());
        }
        // 先检查全部文件名，任意一个无效时不写入任何文件
        for (file_name, _) in files {
            self.folder.validate(file_name.as_deref())?;
        }
        let mut paths = Vec::with_capacity(files.len());
        for (file_name, data) in files {
            paths.push(self.folder.save(file_name.as_deref(), data.as_ref()).await?);
        }

        self.index.ensure_index().await?;
        self.pipeline().run(paths.clone(), |_| {}).await?;
        Ok(paths)
    }

    /// 图片在排序后的列表中所在的页码，从 1 开始
    pub async fn page_of(&self, image_path: &str, page_size: usize) -> Result<usize> {
        let paths = self.folder.list().await?;
        let position = paths
            .iter()
            .position(|p| p == image_path)
            .ok_or_else(|| anyhow!("图片不在本地列表中: {image_path}"))?;
        Ok(position / page_size.max(1) + 1)
    }

    /// 从向量库中删除图片，并将文件重命名为已删除
    pub async fn delete(&self, image_path: &str) -> Result<()> {
        self.folder.check(image_path).await?;

        let id = self.lookup_id(image_path).await?.ok_or_else(|| {
            InvalidRequest(format!("Image is not indexed: {image_path}"))
        })?;
        self.folder.mark_deleted(image_path).await?;
        if let Err(err) = self.index.delete(&[id], &self.namespace).await {
            error!("从向量库删除 {image_path} 失败，恢复文件: {err:#}");
            self.folder.restore(image_path).await?;
            return Err(err.context(format!("删除图片失败: {image_path}")));
        }
        Ok(())
    }

    /// 通过单条查询找到图片在向量库中的 ID
    async fn lookup_id(&self, image_path: &str) -> Result<Option<String>> {
        let record = self.embedder.embed(image_path, image_name(image_path).as_deref()).await?;
        let filter = MetadataFilter::eq("imagePath", image_path);
        let matches = self.index.query(&record.values, 1, Some(&filter), &self.namespace).await?;
        Ok(matches.into_iter().next().map(|m| m.id))
    }
}

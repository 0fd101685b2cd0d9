use std::sync::Arc;

use crate::searcher::{ImageSearch, ImageSelection};

/// 应用状态
pub struct AppState {
    /// 图片目录、嵌入模型与向量库
    pub searcher: ImageSearch,
    /// `/indexImages` 索引的图片范围
    pub selection: ImageSelection,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(searcher: ImageSearch, selection: ImageSelection) -> Arc<Self> {
        Arc::new(AppState { searcher, selection })
    }
}

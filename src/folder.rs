use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info};
use regex::Regex;
use thiserror::Error;
use tokio::task::spawn_blocking;
use walkdir::WalkDir;

/// 被删除的图片会追加这个后缀，而不是真正删除
pub const DELETED_SUFFIX: &str = "_deleted";

/// 客户端传入了无效的参数
#[derive(Debug, Error)]
#[error("{0}")]
pub struct InvalidRequest(pub String);

/// 本地图片目录
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    re_suf: Regex,
}

impl ImageFolder {
    /// `suffix` 为逗号分隔的后缀名列表，例如 `jpg,png`
    pub fn new(root: impl Into<PathBuf>, suffix: &str) -> Result<Self> {
        let re_suf = format!("(?i)^({})$", suffix.replace(',', "|"));
        let re_suf = Regex::new(&re_suf).context("无效的后缀名列表")?;
        Ok(Self { root: root.into(), re_suf })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_image(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| self.re_suf.is_match(&ext.to_string_lossy()))
    }

    /// 列出目录下所有图片（不含已删除的），按路径排序
    pub async fn list(&self) -> Result<Vec<String>> {
        let folder = self.clone();
        spawn_blocking(move || folder.list_blocking()).await?
    }

    fn list_blocking(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(vec![]);
        }
        let mut entries = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| {
                entry.ok().and_then(|entry| {
                    let path = entry.path();
                    if entry.file_type().is_file() && self.is_image(path) {
                        return Some(path.to_string_lossy().to_string());
                    }
                    None
                })
            })
            .collect::<Vec<_>>();
        entries.sort_unstable();
        debug!("扫描 {} 完成，共 {} 张图片", self.root.display(), entries.len());
        Ok(entries)
    }

    /// 检查客户端传入的路径是否为目录内存在的图片
    pub async fn check(&self, image_path: &str) -> Result<()> {
        let folder = self.clone();
        let image_path = image_path.to_owned();
        spawn_blocking(move || folder.check_blocking(&image_path)).await?
    }

    fn check_blocking(&self, image_path: &str) -> Result<()> {
        let invalid = || InvalidRequest(format!("Invalid image path: {image_path}"));

        let path = Path::new(image_path);
        if image_path.is_empty() || !self.is_image(path) {
            return Err(invalid().into());
        }
        let root = self.root.canonicalize().with_context(|| {
            format!("图片目录不存在: {}", self.root.display())
        })?;
        let path = path.canonicalize().map_err(|_| invalid())?;
        if !path.starts_with(&root) || !path.is_file() {
            return Err(invalid().into());
        }
        Ok(())
    }

    /// 检查上传的文件名，返回清理后的文件名
    pub fn validate(&self, file_name: Option<&str>) -> Result<String> {
        let file_name = file_name
            .and_then(sanitize_file_name)
            .ok_or_else(|| InvalidRequest("Missing file name".to_owned()))?;
        if !self.is_image(Path::new(&file_name)) {
            return Err(InvalidRequest(format!("Unsupported file type: {file_name}")).into());
        }
        Ok(file_name)
    }

    /// 保存上传的图片，返回保存后的路径
    pub async fn save(&self, file_name: Option<&str>, data: &[u8]) -> Result<String> {
        let file_name = self.validate(file_name)?;

        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(&file_name);
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("保存图片失败: {}", path.display()))?;
        info!("保存上传图片: {}", path.display());
        Ok(path.to_string_lossy().to_string())
    }

    /// 将图片重命名为 `<path>_deleted`
    pub async fn mark_deleted(&self, image_path: &str) -> Result<PathBuf> {
        let target = PathBuf::from(format!("{image_path}{DELETED_SUFFIX}"));
        tokio::fs::rename(image_path, &target)
            .await
            .with_context(|| format!("重命名图片失败: {image_path}"))?;
        info!("标记图片为已删除: {}", target.display());
        Ok(target)
    }

    /// 撤销 [`ImageFolder::mark_deleted`]
    pub async fn restore(&self, image_path: &str) -> Result<()> {
        let target = format!("{image_path}{DELETED_SUFFIX}");
        tokio::fs::rename(&target, image_path)
            .await
            .with_context(|| format!("恢复图片失败: {image_path}"))?;
        info!("恢复图片: {image_path}");
        Ok(())
    }
}

/// 只保留文件名部分，并替换掉可能有问题的字符
fn sanitize_file_name(name: &str) -> Option<String> {
    let name = Path::new(name).file_name()?.to_string_lossy();
    let name = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || "._-".contains(c) { c } else { '_' })
        .collect::<String>();
    let name = name.trim_start_matches('.');
    if name.is_empty() { None } else { Some(name.to_owned()) }
}

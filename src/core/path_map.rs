//! 源树与目标树之间的路径映射
//!
//! 按路径组件剥离根前缀后再拼接到另一棵树的根上，不做字符串替换，
//! 因此根路径文本在深层路径中重复出现时也不会被误改。

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PathMapError {
    #[error("路径 '{path}' 不在根目录 '{root}' 之下")]
    OutsideRoot { path: PathBuf, root: PathBuf },
}

/// 将 `from_root` 下的路径映射为 `to_root` 下的对应路径
pub fn map_path(path: &Path, from_root: &Path, to_root: &Path) -> Result<PathBuf, PathMapError> {
    let relative = path.strip_prefix(from_root).map_err(|_| PathMapError::OutsideRoot {
        path: path.to_path_buf(),
        root: from_root.to_path_buf(),
    })?;

    if relative.as_os_str().is_empty() {
        Ok(to_root.to_path_buf())
    } else {
        Ok(to_root.join(relative))
    }
}

/// 绑定到已配置根目录的路径映射器
#[derive(Debug, Clone)]
pub struct PathMapper {
    source_root: PathBuf,
    target_root: PathBuf,
}

impl PathMapper {
    pub fn new(source_root: impl Into<PathBuf>, target_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            target_root: target_root.into(),
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn target_root(&self) -> &Path {
        &self.target_root
    }

    pub fn to_target(&self, source_path: &Path) -> Result<PathBuf, PathMapError> {
        map_path(source_path, &self.source_root, &self.target_root)
    }

    pub fn to_source(&self, target_path: &Path) -> Result<PathBuf, PathMapError> {
        map_path(target_path, &self.target_root, &self.source_root)
    }
}

//! 报告文件目录：存储名生成、路径约束与符号链接检查。

use chrono::{DateTime, Utc};
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::ErrorKind;
use uuid::Uuid;

const STORED_EXTENSION: &str = "pdf";

#[derive(Clone, Debug)]
pub struct ReportFiles {
    root: PathBuf,
}

impl ReportFiles {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 生成 `{毫秒时间戳}-{uuid}.pdf` 形式的存储名，与原始文件名无关。
    pub fn new_stored_name(now: DateTime<Utc>) -> String {
        format!(
            "{}-{}.{STORED_EXTENSION}",
            now.timestamp_millis(),
            Uuid::new_v4().simple()
        )
    }

    /// 将存储名解析为目录内的路径；只接受单个普通路径段。
    pub async fn resolve_checked(
        &self,
        filename: &str,
        allow_missing: bool,
    ) -> Result<PathBuf, StorageError> {
        let target = self.resolve(filename)?;
        match fs::symlink_metadata(&target).await {
            Ok(metadata) if metadata.file_type().is_symlink() => Err(StorageError::InvalidName),
            Ok(metadata) if metadata.is_dir() => Err(StorageError::InvalidName),
            Ok(_) => Ok(target),
            Err(err) if err.kind() == ErrorKind::NotFound && allow_missing => Ok(target),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    fn resolve(&self, filename: &str) -> Result<PathBuf, StorageError> {
        if filename.is_empty() || filename.contains(['/', '\\', '\0']) {
            return Err(StorageError::InvalidName);
        }
        let mut components = Path::new(filename).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(segment)), None) => Ok(self.root.join(segment)),
            _ => Err(StorageError::InvalidName),
        }
    }

    /// 删除已写入的文件，用于元数据写入失败后的补偿清理。
    pub async fn remove(&self, filename: &str) -> Result<(), StorageError> {
        let target = self.resolve_checked(filename, false).await?;
        fs::remove_file(target).await?;
        Ok(())
    }
}

/// 仅保留上传方提供的文件名的最后一段，作为不透明的元数据。
pub fn display_name(original: &str) -> Option<String> {
    let name = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name)
}

#[derive(Debug)]
pub enum StorageError {
    InvalidName,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

// 该文件是 Kanjian （看见） 项目的一部分。
// src/face_db.rs - 人脸库
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  collections::BTreeMap,
  path::{Path, PathBuf},
};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum FaceDbError {
  #[error("访问人脸库 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("人脸数据格式错误 {path}: {source}")]
  Format {
    path: PathBuf,
    source: serde_json::Error,
  },
}

/// 人脸库：标识 → 任意 JSON 内容
///
/// 启动时整体加载，检测流程不会使用它。
#[derive(Debug, Default, Clone)]
pub struct FaceDb {
  entries: BTreeMap<String, Value>,
}

impl FaceDb {
  /// 从目录加载所有 `*.json` 文件，目录不存在时创建并返回空库
  pub fn load(dir: impl AsRef<Path>) -> Result<Self, FaceDbError> {
    let dir = dir.as_ref();
    let io_error = |source| FaceDbError::Io {
      path: dir.to_path_buf(),
      source,
    };

    if !dir.exists() {
      std::fs::create_dir_all(dir).map_err(io_error)?;
      info!("创建人脸库目录: {}", dir.display());
      return Ok(Self::default());
    }

    let mut entries = BTreeMap::new();
    for entry in std::fs::read_dir(dir).map_err(io_error)? {
      let path = entry.map_err(io_error)?.path();
      if !path.is_file() || path.extension().is_none_or(|e| e != "json") {
        continue;
      }
      let Some(identity) = identity_of(&path) else {
        continue;
      };

      let text = std::fs::read_to_string(&path).map_err(|source| FaceDbError::Io {
        path: path.clone(),
        source,
      })?;
      let value = serde_json::from_str(&text).map_err(|source| FaceDbError::Format {
        path: path.clone(),
        source,
      })?;
      debug!("加载人脸数据: {}", identity);
      entries.insert(identity, value);
    }

    info!("人脸库加载完成，共 {} 条", entries.len());
    Ok(Self { entries })
  }

  pub fn get(&self, identity: &str) -> Option<&Value> {
    self.entries.get(identity)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn identities(&self) -> impl Iterator<Item = &str> {
    self.entries.keys().map(String::as_str)
  }
}

/// 文件名第一个 `.` 之前的部分
fn identity_of(path: &Path) -> Option<String> {
  let name = path.file_name()?.to_str()?;
  let identity = name.split('.').next()?;
  (!identity.is_empty()).then(|| identity.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_directory_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let faces = dir.path().join("faces");
    let db = FaceDb::load(&faces).unwrap();
    assert!(db.is_empty());
    assert!(faces.is_dir());
  }

  #[test]
  fn loads_only_json_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("alice.json"), r#"{"embedding": [0.1, 0.2]}"#).unwrap();
    std::fs::write(dir.path().join("bob.v2.json"), r#"{"name": "Bob"}"#).unwrap();
    std::fs::write(dir.path().join("notes.txt"), "not a face").unwrap();

    let db = FaceDb::load(dir.path()).unwrap();
    assert_eq!(db.len(), 2);
    assert_eq!(db.identities().collect::<Vec<_>>(), vec!["alice", "bob"]);
    assert_eq!(db.get("bob").unwrap()["name"], "Bob");
    assert!(db.get("notes").is_none());
  }

  #[test]
  fn malformed_file_fails_load() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("broken.json"), "{").unwrap();
    assert!(matches!(
      FaceDb::load(dir.path()),
      Err(FaceDbError::Format { .. })
    ));
  }
}

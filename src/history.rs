// 该文件是 Kanjian （看见） 项目的一部分。
// src/history.rs - 流地址历史记录
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
  io::ErrorKind,
  path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum HistoryError {
  #[error("读取历史记录 {path} 失败: {source}")]
  Read {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("写入历史记录 {path} 失败: {source}")]
  Write {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("历史记录格式错误 {path}: {source}")]
  Format {
    path: PathBuf,
    source: serde_json::Error,
  },
}

/// 流地址历史，整体存为一个 JSON 字符串数组
///
/// 每次追加都会重写整个文件，不做并发保护。
#[derive(Debug, Clone)]
pub struct UrlHistory {
  path: PathBuf,
}

impl UrlHistory {
  pub fn new(path: impl AsRef<Path>) -> Self {
    Self {
      path: path.as_ref().to_path_buf(),
    }
  }

  /// 文件不存在时返回空列表
  pub fn load(&self) -> Result<Vec<String>, HistoryError> {
    let text = match std::fs::read_to_string(&self.path) {
      Ok(text) => text,
      Err(e) if e.kind() == ErrorKind::NotFound => {
        debug!("历史记录 {} 不存在", self.path.display());
        return Ok(Vec::new());
      }
      Err(source) => {
        return Err(HistoryError::Read {
          path: self.path.clone(),
          source,
        });
      }
    };

    serde_json::from_str(&text).map_err(|source| HistoryError::Format {
      path: self.path.clone(),
      source,
    })
  }

  /// 追加地址；已存在时不做任何事。返回追加后的完整列表
  pub fn append(&self, url: &str) -> Result<Vec<String>, HistoryError> {
    let mut urls = self.load()?;
    if urls.iter().any(|u| u == url) {
      return Ok(urls);
    }

    urls.push(url.to_string());
    self.save(&urls)?;
    info!("记录流地址: {}", url);
    Ok(urls)
  }

  fn save(&self, urls: &[String]) -> Result<(), HistoryError> {
    let text = serde_json::to_string_pretty(urls).map_err(|source| HistoryError::Format {
      path: self.path.clone(),
      source,
    })?;
    if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent).map_err(|source| HistoryError::Write {
        path: self.path.clone(),
        source,
      })?;
    }
    std::fs::write(&self.path, text).map_err(|source| HistoryError::Write {
      path: self.path.clone(),
      source,
    })
  }
}

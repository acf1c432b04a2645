// 该文件是 Kanjian （看见） 项目的一部分。
// src/config.rs - 应用配置
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
  path::{Path, PathBuf},
  time::Duration,
};

use crate::{input::SourceOptions, model::YoloParams};

/// 一个 YOLO 系列及其可选规模
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFamily {
  pub name: String,
  pub variants: Vec<String>,
}

impl ModelFamily {
  /// `YOLOv8` → `YOLOv8n` … `YOLOv8x`
  pub fn with_standard_sizes(name: &str) -> Self {
    Self {
      name: name.to_string(),
      variants: ["n", "s", "m", "l", "x"]
        .iter()
        .map(|size| format!("{}{}", name, size))
        .collect(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCatalog {
  pub families: Vec<ModelFamily>,
}

impl Default for ModelCatalog {
  fn default() -> Self {
    Self {
      families: ["YOLOv5", "YOLOv6", "YOLOv8"]
        .iter()
        .map(|name| ModelFamily::with_standard_sizes(name))
        .collect(),
    }
  }
}

impl ModelCatalog {
  pub fn family(&self, name: &str) -> Option<&ModelFamily> {
    self.families.iter().find(|f| f.name == name)
  }

  pub fn contains(&self, variant: &str) -> bool {
    self
      .families
      .iter()
      .any(|f| f.variants.iter().any(|v| v == variant))
  }
}

/// 启动时构造一次，之后按引用传递
#[derive(Debug, Clone)]
pub struct AppConfig {
  pub model_dir: PathBuf,
  pub catalog: ModelCatalog,
  pub face_db_dir: PathBuf,
  pub history_file: PathBuf,
  /// 标签字体，缺省时探测系统字体
  pub font: Option<PathBuf>,
  pub yolo: YoloParams,
  pub open_timeout: Duration,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      model_dir: PathBuf::from("models"),
      catalog: ModelCatalog::default(),
      face_db_dir: PathBuf::from("faces"),
      history_file: PathBuf::from("url_history.json"),
      font: None,
      yolo: YoloParams::default(),
      open_timeout: Duration::from_secs(10),
    }
  }
}

impl AppConfig {
  /// 权重文件路径：`{model_dir}/{variant 小写}.onnx`
  pub fn model_path(&self, variant: &str) -> PathBuf {
    model_path_in(&self.model_dir, variant)
  }

  pub fn source_options(&self) -> SourceOptions {
    SourceOptions {
      open_timeout: self.open_timeout,
    }
  }
}

fn model_path_in(dir: &Path, variant: &str) -> PathBuf {
  dir.join(format!("{}.onnx", variant.to_lowercase()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_catalog_lists_three_families() {
    let catalog = ModelCatalog::default();
    let names: Vec<_> = catalog.families.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["YOLOv5", "YOLOv6", "YOLOv8"]);
    assert_eq!(
      catalog.family("YOLOv6").unwrap().variants,
      vec!["YOLOv6n", "YOLOv6s", "YOLOv6m", "YOLOv6l", "YOLOv6x"]
    );
    assert!(catalog.contains("YOLOv8s"));
    assert!(!catalog.contains("YOLOv7s"));
  }

  #[test]
  fn model_path_is_lowercased() {
    let config = AppConfig::default();
    assert_eq!(
      config.model_path("YOLOv5s"),
      PathBuf::from("models").join("yolov5s.onnx")
    );
  }
}

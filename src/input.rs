// 该文件是 Kanjian （看见） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use std::{fmt, path::PathBuf, time::Duration};

use thiserror::Error;
use tracing::error;
use url::Url;

use crate::frame::Frame;

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::ImageFileSource;

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerSource, GStreamerSourceBuilder};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("无法打开输入源 {source_name}: {reason}")]
  CannotOpen { source_name: String, reason: String },
  #[error("读取帧失败: {0}")]
  ReadFailed(String),
  #[error("无效的输入源: {0}")]
  InvalidSource(String),
  #[error("不支持的输入源: {0}")]
  Unsupported(String),
}

impl InputError {
  pub fn cannot_open(source: impl fmt::Display, reason: impl fmt::Display) -> Self {
    InputError::CannotOpen {
      source_name: source.to_string(),
      reason: reason.to_string(),
    }
  }
}

/// 用户选择的输入源：本地文件或网络流
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
  File(PathBuf),
  Stream(Url),
}

impl SourceSpec {
  pub fn parse(source: &str) -> Result<Self, InputError> {
    let source = source.trim();
    if source.is_empty() {
      return Err(InputError::InvalidSource("输入为空".to_string()));
    }

    match Url::parse(source) {
      // 单字母 scheme 视为 Windows 盘符
      Ok(url) if url.scheme().len() > 1 => {
        if url.scheme() == "file" {
          let path = url
            .to_file_path()
            .map_err(|_| InputError::InvalidSource(source.to_string()))?;
          Ok(SourceSpec::File(path))
        } else {
          Ok(SourceSpec::Stream(url))
        }
      }
      _ => Ok(SourceSpec::File(PathBuf::from(source))),
    }
  }

  pub fn is_stream(&self) -> bool {
    matches!(self, SourceSpec::Stream(_))
  }
}

impl fmt::Display for SourceSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SourceSpec::File(path) => write!(f, "{}", path.display()),
      SourceSpec::Stream(url) => write!(f, "{}", url),
    }
  }
}

/// 帧来源
///
/// 迭代结束（`None`）表示流已耗尽，`Some(Err(_))` 表示读取失败。
/// 读取失败后不再重试。
pub trait FrameSource: Iterator<Item = Result<Frame, InputError>> {
  /// 释放底层句柄，可重复调用
  fn release(&mut self);

  fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
  fn release(&mut self) {
    (**self).release()
  }

  fn describe(&self) -> String {
    (**self).describe()
  }
}

#[derive(Debug, Clone)]
pub struct SourceOptions {
  /// 等待管道预卷的时长
  pub open_timeout: Duration,
}

impl Default for SourceOptions {
  fn default() -> Self {
    Self {
      open_timeout: Duration::from_secs(10),
    }
  }
}

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];

fn is_image_path(path: &std::path::Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
    .unwrap_or(false)
}

/// 打开输入源
pub fn open_source(
  spec: &SourceSpec,
  options: &SourceOptions,
) -> Result<Box<dyn FrameSource>, InputError> {
  match spec {
    SourceSpec::File(path) => {
      if !path.is_file() {
        error!("输入文件不存在: {}", path.display());
        return Err(InputError::cannot_open(path.display(), "文件不存在"));
      }

      #[cfg(feature = "read_image_file")]
      if is_image_path(path) {
        return Ok(Box::new(ImageFileSource::open(path)?));
      }

      #[cfg(feature = "gstreamer_input")]
      {
        let source = GStreamerSourceBuilder::file(path)
          .open_timeout(options.open_timeout)
          .build()?;
        Ok(Box::new(source))
      }

      #[cfg(not(feature = "gstreamer_input"))]
      {
        Err(InputError::Unsupported(path.display().to_string()))
      }
    }
    SourceSpec::Stream(url) => {
      #[cfg(feature = "gstreamer_input")]
      {
        use crate::FromUrl;

        let source = GStreamerSourceBuilder::from_url(url)?
          .open_timeout(options.open_timeout)
          .build()?;
        Ok(Box::new(source))
      }

      #[cfg(not(feature = "gstreamer_input"))]
      {
        Err(InputError::Unsupported(url.to_string()))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn plain_paths_are_files() {
    assert_eq!(
      SourceSpec::parse("videos/clip.mp4").unwrap(),
      SourceSpec::File(PathBuf::from("videos/clip.mp4"))
    );
    assert_eq!(
      SourceSpec::parse("C:\\videos\\clip.mp4").unwrap(),
      SourceSpec::File(PathBuf::from("C:\\videos\\clip.mp4"))
    );
  }

  #[test]
  fn urls_are_streams() {
    let spec = SourceSpec::parse(" rtsp://192.168.1.10:8554/live ").unwrap();
    assert!(spec.is_stream());
    assert_eq!(spec.to_string(), "rtsp://192.168.1.10:8554/live");
  }

  #[test]
  fn file_urls_become_paths() {
    assert_eq!(
      SourceSpec::parse("file:///tmp/clip.mp4").unwrap(),
      SourceSpec::File(PathBuf::from("/tmp/clip.mp4"))
    );
  }

  #[test]
  fn empty_input_is_rejected() {
    assert!(matches!(
      SourceSpec::parse("   "),
      Err(InputError::InvalidSource(_))
    ));
  }

  #[test]
  fn missing_file_cannot_open() {
    let spec = SourceSpec::File(PathBuf::from("/no/such/dir/video.mp4"));
    let result = open_source(&spec, &SourceOptions::default());
    assert!(matches!(result, Err(InputError::CannotOpen { .. })));
  }

  #[test]
  fn image_extensions_are_recognised() {
    assert!(is_image_path(std::path::Path::new("a/b.JPG")));
    assert!(!is_image_path(std::path::Path::new("a/b.mp4")));
  }
}

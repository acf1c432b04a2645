// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::path::{Path, PathBuf};

use image::ImageReader;
use tracing::{error, info};

use crate::{
  frame::Frame,
  input::{FrameSource, InputError},
};

/// 单张图片作为只有一帧的输入源
pub struct ImageFileSource {
  path: PathBuf,
  image: Option<image::RgbImage>,
}

impl ImageFileSource {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, InputError> {
    let path = path.as_ref();
    let image = ImageReader::open(path)
      .map_err(|e| InputError::cannot_open(path.display(), e))?
      .with_guessed_format()
      .map_err(|e| InputError::cannot_open(path.display(), e))?
      .decode()
      .map_err(|e| {
        error!("图像解码失败 {}: {}", path.display(), e);
        InputError::cannot_open(path.display(), e)
      })?;

    info!(
      "打开图像文件: {} ({}x{})",
      path.display(),
      image.width(),
      image.height()
    );

    Ok(Self {
      path: path.to_path_buf(),
      image: Some(image.into_rgb8()),
    })
  }
}

impl Iterator for ImageFileSource {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take().map(|image| Ok(Frame::new(image, 0, 0)))
  }
}

impl FrameSource for ImageFileSource {
  fn release(&mut self) {
    self.image = None;
  }

  fn describe(&self) -> String {
    format!("image://{}", self.path.display())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  #[test]
  fn yields_exactly_one_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("still.png");
    RgbImage::from_pixel(4, 3, Rgb([1, 2, 3])).save(&path).unwrap();

    let mut source = ImageFileSource::open(&path).unwrap();
    let frame = source.next().unwrap().unwrap();
    assert_eq!((frame.width(), frame.height()), (4, 3));
    assert!(source.next().is_none());
  }

  #[test]
  fn garbage_file_cannot_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.png");
    std::fs::write(&path, b"not an image").unwrap();
    assert!(matches!(
      ImageFileSource::open(&path),
      Err(InputError::CannotOpen { .. })
    ));
  }
}

// 该文件是 Kanjian （看见） 项目的一部分。
// src/frame.rs - 视频帧定义
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

use image::RgbImage;

pub const RGB_CHANNELS: usize = 3;

/// 单帧图像，仅在一次循环迭代内有效
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
  /// RGB 图像数据（HWC 排列）
  pub image: RgbImage,
  /// 帧索引
  pub index: u64,
  /// 时间戳（毫秒）
  pub timestamp_ms: u64,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, timestamp_ms: u64) -> Self {
    Self {
      image,
      index,
      timestamp_ms,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

/// 从紧凑或带行对齐的 RGB/BGR 数据构造图像
pub(crate) fn packed_to_rgb_image(
  data: &[u8],
  width: usize,
  height: usize,
  stride: usize,
  bgr: bool,
) -> Option<RgbImage> {
  let row_bytes = width * RGB_CHANNELS;
  if stride < row_bytes || height == 0 || data.len() < stride * (height - 1) + row_bytes {
    return None;
  }

  let mut pixels = Vec::with_capacity(row_bytes * height);
  for y in 0..height {
    let row = &data[y * stride..y * stride + row_bytes];
    if bgr {
      for px in row.chunks_exact(RGB_CHANNELS) {
        pixels.extend_from_slice(&[px[2], px[1], px[0]]);
      }
    } else {
      pixels.extend_from_slice(row);
    }
  }

  RgbImage::from_raw(width as u32, height as u32, pixels)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stride_padding_is_dropped() {
    // 2x2 RGB，每行补齐到 8 字节
    let data = [
      1, 2, 3, 4, 5, 6, 0, 0, //
      7, 8, 9, 10, 11, 12, 0, 0,
    ];
    let image = packed_to_rgb_image(&data, 2, 2, 8, false).unwrap();
    assert_eq!(image.as_raw(), &vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
  }

  #[test]
  fn bgr_is_reordered() {
    let data = [30, 20, 10];
    let image = packed_to_rgb_image(&data, 1, 1, 3, true).unwrap();
    assert_eq!(image.get_pixel(0, 0).0, [10, 20, 30]);
  }

  #[test]
  fn short_buffer_is_rejected() {
    assert!(packed_to_rgb_image(&[0; 5], 1, 2, 3, false).is_none());
  }
}

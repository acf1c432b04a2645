// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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
  fmt::Display,
  panic::{self, AssertUnwindSafe},
  path::Path,
};

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::Frame,
  model::{DetectItem, DetectResult, Model, WithLabel},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const LABEL_TEXT_COLOR: [u8; 3] = [0, 0, 0];

/// 内嵌的标签字体 (DejaVu Sans)
const DEFAULT_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无效的字体文件: {0}")]
  InvalidFont(String),
}

/// 单帧的标注结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Annotation {
  /// 画出了 n 个检测框
  Annotated(usize),
  /// 没有检测到对象，帧保持原样
  Empty,
  /// 检测或绘制失败，帧保持原样
  Failed(String),
}

/// 经过检测与标注的帧
#[derive(Debug, Clone)]
pub struct AnnotatedFrame<T> {
  pub frame: Frame,
  pub result: Option<DetectResult<T>>,
  pub annotation: Annotation,
}

impl<T> AnnotatedFrame<T> {
  pub fn detections(&self) -> usize {
    match self.annotation {
      Annotation::Annotated(n) => n,
      _ => 0,
    }
  }
}

pub struct Draw {
  font_size: f32,
  font: Option<FontArc>,
  box_color: [u8; 3],
  text_color: [u8; 3],
}

impl Default for Draw {
  fn default() -> Self {
    Self::with_default_font()
  }
}

impl Draw {
  pub fn new(font: Option<FontArc>) -> Self {
    Self {
      font_size: LABEL_FONT_SIZE,
      font,
      box_color: BOX_COLOR,
      text_color: LABEL_TEXT_COLOR,
    }
  }

  pub fn with_font_file(path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    let font =
      FontArc::try_from_vec(data).map_err(|_| DrawError::InvalidFont(path.display().to_string()))?;
    info!("加载字体: {}", path.display());
    Ok(Self::new(Some(font)))
  }

  /// 使用内嵌字体
  pub fn with_default_font() -> Self {
    match FontArc::try_from_slice(DEFAULT_FONT) {
      Ok(font) => Self::new(Some(font)),
      Err(e) => {
        warn!("无法加载嵌入的字体，标签文字将不会绘制: {}", e);
        Self::new(None)
      }
    }
  }

  // 在图像上绘制一个 2 像素宽的边框和标签，bbox 为帧像素坐标 [x1, y1, x2, y2]
  fn draw_bbox_with_label<T: WithLabel>(&self, image: &mut RgbImage, item: &DetectItem<T>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = (item.bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (item.bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (item.bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (item.bbox[3].ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      debug!("跳过退化检测框: {:?}", item.bbox);
      return;
    }

    let color = Rgb(self.box_color);
    for thickness in 0..BOX_THICKNESS {
      let width = x_max - x_min + 1 - 2 * thickness;
      let height = y_max - y_min + 1 - 2 * thickness;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect =
        Rect::at(x_min + thickness, y_min + thickness).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = self.font.as_ref() else {
      return;
    };

    let label = label_text(item);
    let scale = PxScale::from(self.font_size);
    let (text_w, text_h) = text_size(scale, font, &label);
    let label_w = (text_w as i32 + 2 * LABEL_PADDING).min(w - x_min);
    let label_h = text_h as i32 + 2 * LABEL_PADDING;

    // 标签锚定在框左上角的上方，空间不足时贴着图像顶部
    let label_x = x_min;
    let label_y = (y_min - label_h).max(0);

    if label_w > 0 && label_h > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_w as u32, label_h as u32);
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        Rgb(self.text_color),
        label_x + LABEL_PADDING,
        label_y + LABEL_PADDING,
        scale,
        font,
        &label,
      );
    }
  }

  pub fn draw_detections<T: WithLabel>(&self, image: &mut RgbImage, result: &DetectResult<T>) {
    for item in result.items.iter() {
      self.draw_bbox_with_label(image, item);
    }
  }

  /// 检测并标注一帧
  ///
  /// 有检测结果时返回画好框的副本；没有结果、模型报错或中途 panic 时原样返回输入帧。
  pub fn annotate<M, T>(&self, frame: Frame, model: &M) -> AnnotatedFrame<T>
  where
    M: Model<Input = Frame, Output = DetectResult<T>> + ?Sized,
    M::Error: Display,
    T: WithLabel,
  {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
      let result = model.infer(&frame).map_err(|e| e.to_string())?;
      if result.is_empty() {
        return Ok((None, result));
      }
      let mut image = frame.image.clone();
      self.draw_detections(&mut image, &result);
      Ok::<_, String>((Some(image), result))
    }));

    match outcome {
      Ok(Ok((Some(image), result))) => {
        let count = result.len();
        info!("帧 {}: 检测到 {} 个对象", frame.index, count);
        for item in result.items.iter() {
          debug!(
            "  - {}: {:.2} at {:?}",
            item.kind.to_label_str(),
            item.score,
            item.bbox
          );
        }
        AnnotatedFrame {
          frame: Frame { image, ..frame },
          result: Some(result),
          annotation: Annotation::Annotated(count),
        }
      }
      Ok(Ok((None, result))) => {
        info!("帧 {}: 未检测到对象", frame.index);
        AnnotatedFrame {
          frame,
          result: Some(result),
          annotation: Annotation::Empty,
        }
      }
      Ok(Err(reason)) => {
        error!("帧 {}: 检测与标注失败: {}", frame.index, reason);
        AnnotatedFrame {
          frame,
          result: None,
          annotation: Annotation::Failed(reason),
        }
      }
      Err(payload) => {
        let reason = panic_message(payload.as_ref());
        error!("帧 {}: 检测过程中发生 panic: {}", frame.index, reason);
        AnnotatedFrame {
          frame,
          result: None,
          annotation: Annotation::Failed(reason),
        }
      }
    }
  }
}

/// 标签文字，形如 `person 0.87`
fn label_text<T: WithLabel>(item: &DetectItem<T>) -> String {
  format!("{} {:.2}", item.kind.to_label_str(), item.score)
}

/// 检测并标注一帧，只返回要显示的帧
pub fn detect_and_annotate<M, T>(draw: &Draw, frame: Frame, model: &M) -> Frame
where
  M: Model<Input = Frame, Output = DetectResult<T>> + ?Sized,
  M::Error: Display,
  T: WithLabel,
{
  draw.annotate(frame, model).frame
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "unknown panic".to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::CocoLabel;

  struct FixedModel(Vec<DetectItem<CocoLabel>>);

  impl Model for FixedModel {
    type Input = Frame;
    type Output = DetectResult<CocoLabel>;
    type Error = String;

    fn infer(&self, _input: &Frame) -> Result<Self::Output, Self::Error> {
      Ok(DetectResult::from(self.0.clone()))
    }
  }

  struct FailingModel;

  impl Model for FailingModel {
    type Input = Frame;
    type Output = DetectResult<CocoLabel>;
    type Error = String;

    fn infer(&self, _input: &Frame) -> Result<Self::Output, Self::Error> {
      Err("backend exploded".to_string())
    }
  }

  struct PanickingModel;

  impl Model for PanickingModel {
    type Input = Frame;
    type Output = DetectResult<CocoLabel>;
    type Error = String;

    fn infer(&self, _input: &Frame) -> Result<Self::Output, Self::Error> {
      panic!("malformed tensor")
    }
  }

  fn black_frame() -> Frame {
    Frame::new(RgbImage::new(10, 10), 7, 0)
  }

  fn person(bbox: [f32; 4]) -> DetectItem<CocoLabel> {
    DetectItem {
      kind: CocoLabel::from_label_id(0),
      score: 0.87,
      bbox,
    }
  }

  #[test]
  fn empty_result_returns_input_unchanged() {
    let draw = Draw::new(None);
    let input = black_frame();
    let out = draw.annotate(input.clone(), &FixedModel(vec![]));
    assert_eq!(out.annotation, Annotation::Empty);
    assert_eq!(out.frame, input);
  }

  #[test]
  fn model_error_returns_input_unchanged() {
    let draw = Draw::new(None);
    let input = black_frame();
    let out = draw.annotate(input.clone(), &FailingModel);
    assert_eq!(
      out.annotation,
      Annotation::Failed("backend exploded".to_string())
    );
    assert_eq!(out.frame, input);
    assert!(out.result.is_none());
  }

  #[test]
  fn model_panic_returns_input_unchanged() {
    let draw = Draw::new(None);
    let input = black_frame();
    let out = draw.annotate(input.clone(), &PanickingModel);
    assert_eq!(
      out.annotation,
      Annotation::Failed("malformed tensor".to_string())
    );
    assert_eq!(out.frame, input);
  }

  #[test]
  fn detection_draws_two_pixel_box() {
    let draw = Draw::new(None);
    let input = black_frame();
    let out = draw.annotate(input.clone(), &FixedModel(vec![person([2.0, 2.0, 8.0, 8.0])]));

    assert_eq!(out.annotation, Annotation::Annotated(1));
    assert_eq!(out.detections(), 1);
    assert_ne!(out.frame, input);
    assert_eq!(out.frame.index, input.index);

    let image = &out.frame.image;
    assert_eq!(image.get_pixel(2, 2).0, BOX_COLOR);
    assert_eq!(image.get_pixel(3, 3).0, BOX_COLOR);
    assert_eq!(image.get_pixel(8, 8).0, BOX_COLOR);
    assert_eq!(image.get_pixel(5, 5).0, [0, 0, 0]);
  }

  #[test]
  fn out_of_frame_boxes_are_clamped() {
    let draw = Draw::new(None);
    let out = draw.annotate(
      black_frame(),
      &FixedModel(vec![person([-50.0, -50.0, 500.0, 500.0])]),
    );
    assert_eq!(out.frame.image.get_pixel(0, 0).0, BOX_COLOR);
    assert_eq!(out.frame.image.get_pixel(9, 9).0, BOX_COLOR);
  }

  #[test]
  fn detect_and_annotate_returns_frame_only() {
    let draw = Draw::new(None);
    let input = black_frame();
    assert_eq!(
      detect_and_annotate(&draw, input.clone(), &FixedModel(vec![])),
      input
    );
  }

  #[test]
  fn missing_font_file_is_an_error() {
    assert!(matches!(
      Draw::with_font_file("/no/such/font.ttf"),
      Err(DrawError::IoError(_))
    ));
  }

  #[test]
  fn label_text_has_name_and_score() {
    assert_eq!(label_text(&person([0.0, 0.0, 1.0, 1.0])), "person 0.87");
    let unknown = DetectItem {
      kind: CocoLabel::from_label_id(200),
      score: 0.5,
      bbox: [0.0; 4],
    };
    assert_eq!(label_text(&unknown), "Unknown 0.50");
  }

  #[test]
  fn label_is_drawn_above_the_box() {
    let draw = Draw::default();
    let input = Frame::new(RgbImage::new(100, 100), 0, 0);
    let out = draw.annotate(input, &FixedModel(vec![person([20.0, 40.0, 80.0, 90.0])]));
    let image = &out.frame.image;

    let label_pixels = (0..40)
      .flat_map(|y| (0..100).map(move |x| (x, y)))
      .filter(|&(x, y)| image.get_pixel(x, y).0 == BOX_COLOR)
      .count();
    assert!(label_pixels > 0);
    // 标签背景贴着框的左上角
    assert_eq!(image.get_pixel(20, 39).0, BOX_COLOR);
    // 框左侧的区域不受影响
    assert_eq!(image.get_pixel(10, 30).0, [0, 0, 0]);
  }

  #[test]
  fn boxes_without_font_leave_rows_above_untouched() {
    let draw = Draw::new(None);
    let input = Frame::new(RgbImage::new(100, 100), 0, 0);
    let out = draw.annotate(input, &FixedModel(vec![person([20.0, 40.0, 80.0, 90.0])]));
    let image = &out.frame.image;
    assert!((0..40).all(|y| (0..100).all(|x| image.get_pixel(x, y).0 == [0, 0, 0])));
  }
}

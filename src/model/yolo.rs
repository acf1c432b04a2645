// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/yolo.rs - YOLO ONNX 检测模型
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

use image::{Rgb, RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::{debug, error, info};
use tract_onnx::prelude::*;

use crate::{
  frame::Frame,
  model::{CocoLabel, DetectItem, DetectResult, Model, WithLabel},
};

const YOLO_PAD_VALUE: u8 = 114;
const YOLO_BOX_CHANNELS: usize = 4;

#[derive(Error, Debug)]
pub enum YoloError {
  #[error("模型文件不存在: {0}")]
  ModelNotFound(PathBuf),
  #[error("模型加载错误: {path}: {reason}")]
  ModelLoad { path: PathBuf, reason: TractError },
  #[error("模型无效: {0}")]
  InvalidModel(String),
  #[error("推理错误: {0}")]
  Inference(TractError),
}

/// 推理参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YoloParams {
  pub input_size: u32,
  pub confidence: f32,
  pub iou: f32,
  pub max_detections: usize,
}

impl Default for YoloParams {
  fn default() -> Self {
    Self {
      input_size: 640,
      confidence: 0.25,
      iou: 0.45,
      max_detections: 300,
    }
  }
}

pub struct YoloBuilder {
  model_path: PathBuf,
  params: YoloParams,
}

impl YoloBuilder {
  pub fn new(model_path: impl AsRef<Path>) -> Self {
    Self {
      model_path: model_path.as_ref().to_path_buf(),
      params: YoloParams::default(),
    }
  }

  pub fn params(mut self, params: YoloParams) -> Self {
    self.params = params;
    self
  }

  pub fn confidence(mut self, confidence: f32) -> Self {
    self.params.confidence = confidence;
    self
  }

  pub fn iou(mut self, iou: f32) -> Self {
    self.params.iou = iou;
    self
  }

  pub fn input_size(mut self, input_size: u32) -> Self {
    self.params.input_size = input_size;
    self
  }

  pub fn build(self) -> Result<Yolo, YoloError> {
    if !self.model_path.is_file() {
      error!("模型文件不存在: {}", self.model_path.display());
      return Err(YoloError::ModelNotFound(self.model_path));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let size = self.params.input_size as usize;
    let load_error = |reason| YoloError::ModelLoad {
      path: self.model_path.clone(),
      reason,
    };

    let plan = tract_onnx::onnx()
      .model_for_path(&self.model_path)
      .map_err(load_error)?
      .with_input_fact(
        0,
        InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
      )
      .map_err(load_error)?
      .into_optimized()
      .map_err(load_error)?
      .into_runnable()
      .map_err(load_error)?;
    info!("模型加载完成");
    debug!("推理参数: {:?}", self.params);

    Ok(Yolo {
      plan,
      params: self.params,
    })
  }
}

/// 基于 tract 的 YOLO 检测模型
pub struct Yolo {
  plan: TypedRunnableModel<TypedModel>,
  params: YoloParams,
}

impl Model for Yolo {
  type Input = Frame;
  type Output = DetectResult<CocoLabel>;
  type Error = YoloError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let letterbox = Letterbox::new(input.width(), input.height(), self.params.input_size);
    debug!("设置模型输入: {:?}", letterbox);
    let tensor = letterbox.to_tensor(&input.image);

    debug!("执行模型推理");
    let outputs = self
      .plan
      .run(tvec!(tensor.into()))
      .map_err(YoloError::Inference)?;
    let output = outputs
      .first()
      .ok_or_else(|| YoloError::InvalidModel("模型没有输出".to_string()))?;
    let view = output
      .to_array_view::<f32>()
      .map_err(YoloError::Inference)?;

    let shape = view.shape().to_vec();
    if shape.len() != 3 || shape[0] != 1 {
      return Err(YoloError::InvalidModel(format!(
        "不支持的输出形状: {:?}",
        shape
      )));
    }
    let data: Vec<f32> = view.iter().copied().collect();
    let layout = OutputLayout::detect(shape[1], shape[2])?;
    debug!("模型输出形状: {:?}, 布局: {:?}", shape, layout);

    let candidates = decode(&data, layout, self.params.confidence);
    let kept = non_max_suppression(candidates, self.params.iou, self.params.max_detections);

    let items = kept
      .into_iter()
      .map(|c| DetectItem {
        kind: CocoLabel::from_label_id(c.class_id),
        score: c.score,
        bbox: letterbox.to_frame_bbox(c.bbox),
      })
      .collect::<Vec<_>>();

    debug!("检测到 {} 个物体", items.len());
    Ok(DetectResult::from(items))
  }
}

/// 等比缩放并填充到正方形输入
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Letterbox {
  frame_w: u32,
  frame_h: u32,
  size: u32,
  scale: f32,
  pad_x: f32,
  pad_y: f32,
}

impl Letterbox {
  pub(crate) fn new(frame_w: u32, frame_h: u32, size: u32) -> Self {
    let scale = (size as f32 / frame_w.max(1) as f32).min(size as f32 / frame_h.max(1) as f32);
    let new_w = (frame_w as f32 * scale).round();
    let new_h = (frame_h as f32 * scale).round();
    Self {
      frame_w,
      frame_h,
      size,
      scale,
      pad_x: ((size as f32 - new_w) / 2.0).floor(),
      pad_y: ((size as f32 - new_h) / 2.0).floor(),
    }
  }

  fn resized_dims(&self) -> (u32, u32) {
    (
      ((self.frame_w as f32 * self.scale).round() as u32).clamp(1, self.size),
      ((self.frame_h as f32 * self.scale).round() as u32).clamp(1, self.size),
    )
  }

  fn to_image(&self, image: &RgbImage) -> RgbImage {
    let (w, h) = self.resized_dims();
    let resized = image::imageops::resize(image, w, h, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(self.size, self.size, Rgb([YOLO_PAD_VALUE; 3]));
    image::imageops::replace(
      &mut canvas,
      &resized,
      self.pad_x as i64,
      self.pad_y as i64,
    );
    canvas
  }

  fn to_tensor(&self, image: &RgbImage) -> Tensor {
    let canvas = self.to_image(image);
    let size = self.size as usize;
    let pixels = canvas.as_raw();
    tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
      pixels[(y * size + x) * 3 + c] as f32 / 255.0
    })
    .into_tensor()
  }

  /// 输入坐标 -> 帧像素坐标
  pub(crate) fn to_frame_bbox(&self, bbox: [f32; 4]) -> [f32; 4] {
    let (w, h) = (self.frame_w as f32, self.frame_h as f32);
    [
      ((bbox[0] - self.pad_x) / self.scale).clamp(0.0, w),
      ((bbox[1] - self.pad_y) / self.scale).clamp(0.0, h),
      ((bbox[2] - self.pad_x) / self.scale).clamp(0.0, w),
      ((bbox[3] - self.pad_y) / self.scale).clamp(0.0, h),
    ]
  }
}

/// 输出张量排列
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputLayout {
  /// `[4 + C, N]`，无目标置信度（YOLOv8 及之后）
  ChannelMajor { channels: usize, anchors: usize },
  /// `[N, 5 + C]`，带目标置信度（YOLOv5 / YOLOv6）
  RowMajor { anchors: usize, channels: usize },
}

impl OutputLayout {
  pub(crate) fn detect(dim1: usize, dim2: usize) -> Result<Self, YoloError> {
    if dim1 < dim2 {
      if dim1 <= YOLO_BOX_CHANNELS {
        return Err(YoloError::InvalidModel(format!("输出通道数过少: {}", dim1)));
      }
      Ok(OutputLayout::ChannelMajor {
        channels: dim1,
        anchors: dim2,
      })
    } else {
      if dim2 <= YOLO_BOX_CHANNELS + 1 {
        return Err(YoloError::InvalidModel(format!("输出通道数过少: {}", dim2)));
      }
      Ok(OutputLayout::RowMajor {
        anchors: dim1,
        channels: dim2,
      })
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Candidate {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4],
}

pub(crate) fn decode(data: &[f32], layout: OutputLayout, threshold: f32) -> Vec<Candidate> {
  let mut candidates = Vec::new();

  let (anchors, channels) = match layout {
    OutputLayout::ChannelMajor { channels, anchors } => (anchors, channels),
    OutputLayout::RowMajor { anchors, channels } => (anchors, channels),
  };
  let value = |ch: usize, i: usize| match layout {
    OutputLayout::ChannelMajor { anchors, .. } => data[ch * anchors + i],
    OutputLayout::RowMajor { channels, .. } => data[i * channels + ch],
  };
  let (class_start, with_objectness) = match layout {
    OutputLayout::ChannelMajor { .. } => (YOLO_BOX_CHANNELS, false),
    OutputLayout::RowMajor { .. } => (YOLO_BOX_CHANNELS + 1, true),
  };

  for i in 0..anchors {
    let mut best = (0usize, f32::MIN);
    for c in class_start..channels {
      let score = value(c, i);
      if score > best.1 {
        best = (c - class_start, score);
      }
    }

    let score = if with_objectness {
      best.1 * value(YOLO_BOX_CHANNELS, i)
    } else {
      best.1
    };
    if score < threshold {
      continue;
    }

    let (cx, cy, w, h) = (value(0, i), value(1, i), value(2, i), value(3, i));
    candidates.push(Candidate {
      class_id: best.0 as u32,
      score,
      bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
    });
  }

  candidates
}

pub(crate) fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  let inter = ix * iy;
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - inter;
  if union <= 0.0 { 0.0 } else { inter / union }
}

/// 按类别的非极大值抑制
pub(crate) fn non_max_suppression(
  mut candidates: Vec<Candidate>,
  iou_threshold: f32,
  max_detections: usize,
) -> Vec<Candidate> {
  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<Candidate> = Vec::new();
  for candidate in candidates {
    if kept.len() >= max_detections {
      break;
    }
    let suppressed = kept.iter().any(|k| {
      k.class_id == candidate.class_id && iou(&k.bbox, &candidate.bbox) > iou_threshold
    });
    if !suppressed {
      kept.push(candidate);
    }
  }
  kept
}

// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入模块
//!
//! 基于 GStreamer 的视频输入，支持：
//! - 本地视频文件（`filesrc ! decodebin`）
//! - 网络流（RTSP / RTMP / HTTP / UDP / SRT，经由 `uridecodebin`）
//!
//! 所有输入都在管道中转换为 RGB，`appsink` 取出后整理为紧凑的 `RgbImage`。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! ## 基本用法
//!
//! ```no_run
//! use kanjian::{FromUrl, input::GStreamerSourceBuilder};
//! use url::Url;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let url = Url::parse("rtsp://192.168.1.100:8554/stream")?;
//! let source = GStreamerSourceBuilder::from_url(&url)?.build()?;
//!
//! for frame in source {
//!     let frame = frame?;
//!     println!("帧 {}: {}x{}", frame.index, frame.width(), frame.height());
//! }
//! # Ok(())
//! # }
//! ```

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl,
  frame::{Frame, packed_to_rgb_image},
  input::{FrameSource, InputError},
};

const NETWORK_SCHEMES: [&str; 7] = ["rtsp", "rtsps", "rtmp", "http", "https", "udp", "srt"];
/// 实时推流协议，其余网络地址按点播处理
const LIVE_SCHEMES: [&str; 5] = ["rtsp", "rtsps", "rtmp", "udp", "srt"];

pub enum GStreamerSourceItem {
  FileSource(PathBuf),
  UriSource(String),
  TargetFormat { format: String },
}

impl GStreamerSourceItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerSourceItem::FileSource(path) => {
        format!(
          "filesrc location=\"{}\" ! decodebin",
          path.display().to_string().replace('"', "\\\"")
        )
      }
      GStreamerSourceItem::UriSource(uri) => {
        format!("uridecodebin uri=\"{}\"", uri.replace('"', "%22"))
      }
      GStreamerSourceItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
    }
  }
}

/// GStreamer 输入管道构建器
pub struct GStreamerSourceBuilder {
  name: String,
  items: Vec<GStreamerSourceItem>,
  live: bool,
  open_timeout: Duration,
}

impl GStreamerSourceBuilder {
  pub fn file(path: impl AsRef<Path>) -> Self {
    let path = path.as_ref();
    Self {
      name: path.display().to_string(),
      items: vec![
        GStreamerSourceItem::FileSource(path.to_path_buf()),
        GStreamerSourceItem::TargetFormat {
          format: "RGB".to_string(),
        },
      ],
      live: false,
      open_timeout: Duration::from_secs(10),
    }
  }

  pub fn uri(url: &Url) -> Self {
    Self {
      name: url.to_string(),
      items: vec![
        GStreamerSourceItem::UriSource(url.to_string()),
        GStreamerSourceItem::TargetFormat {
          format: "RGB".to_string(),
        },
      ],
      live: LIVE_SCHEMES.contains(&url.scheme()),
      open_timeout: Duration::from_secs(10),
    }
  }

  pub fn open_timeout(mut self, timeout: Duration) -> Self {
    self.open_timeout = timeout;
    self
  }

  fn description(&self) -> String {
    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerSourceItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    // 实时流只保留最新的两帧；点播不丢帧，队列满时阻塞解码
    let sink = if self.live {
      "appsink name=sink max-buffers=2 drop=true sync=false"
    } else {
      "appsink name=sink sync=false max-buffers=2 drop=false"
    };
    format!("{} ! {}", basic_pipeline, sink)
  }

  pub fn build(self) -> Result<GStreamerSource, InputError> {
    let open_error = |reason: &dyn std::fmt::Display| InputError::cannot_open(&self.name, reason);

    gst::init().map_err(|e| open_error(&e))?;

    let full_pipeline = self.description();
    info!("GStreamer pipeline description: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)
      .map_err(|e| open_error(&e))?
      .downcast::<gst::Pipeline>()
      .map_err(|_| open_error(&"无法创建管道"))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or_else(|| open_error(&"找不到 appsink"))?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| open_error(&"无法转换为 appsink"))?;

    if let Err(e) = pipeline.set_state(gst::State::Playing) {
      let reason = bus_error(&pipeline).unwrap_or_else(|| e.to_string());
      let _ = pipeline.set_state(gst::State::Null);
      error!("启动管道失败: {}", reason);
      return Err(open_error(&reason));
    }

    let timeout = gst::ClockTime::from_mseconds(self.open_timeout.as_millis() as u64);
    let (result, current, pending) = pipeline.state(timeout);
    debug!("管道状态: {:?} -> {:?}", current, pending);
    if let Err(reason) = preroll_outcome(result) {
      let reason = bus_error(&pipeline).unwrap_or(reason);
      let _ = pipeline.set_state(gst::State::Null);
      error!("管道预卷失败: {}", reason);
      return Err(open_error(&reason));
    }

    Ok(GStreamerSource {
      name: self.name,
      pipeline,
      appsink,
      frame_index: 0,
      finished: false,
    })
  }
}

impl FromUrl for GStreamerSourceBuilder {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      "file" => {
        let path = url
          .to_file_path()
          .map_err(|_| InputError::InvalidSource(url.to_string()))?;
        Ok(Self::file(path))
      }
      scheme if NETWORK_SCHEMES.contains(&scheme) => Ok(Self::uri(url)),
      scheme => Err(InputError::Unsupported(format!("URI scheme: {}", scheme))),
    }
  }
}

/// GStreamer 视频输入
pub struct GStreamerSource {
  name: String,
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  frame_index: u64,
  finished: bool,
}

impl Drop for GStreamerSource {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl Iterator for GStreamerSource {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    match self.appsink.pull_sample() {
      Ok(sample) => {
        let frame = convert_sample(&sample, self.frame_index);
        self.frame_index += 1;
        if frame.is_err() {
          self.finished = true;
        }
        Some(frame)
      }
      Err(_) if self.appsink.is_eos() => {
        info!("输入流结束: {}", self.name);
        self.finished = true;
        None
      }
      Err(e) => {
        self.finished = true;
        let reason = bus_error(&self.pipeline).unwrap_or_else(|| e.to_string());
        error!("Failed to pull sample: {}", reason);
        Some(Err(InputError::ReadFailed(reason)))
      }
    }
  }
}

impl FrameSource for GStreamerSource {
  fn release(&mut self) {
    self.finished = true;
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }

  fn describe(&self) -> String {
    self.name.clone()
  }
}

/// 预卷结果：超时仍在异步切换视为失败，直播源的 NoPreroll 视为成功
fn preroll_outcome(
  result: Result<gst::StateChangeSuccess, gst::StateChangeError>,
) -> Result<(), String> {
  match result {
    Ok(gst::StateChangeSuccess::Async) => Err("预卷超时".to_string()),
    Ok(_) => Ok(()),
    Err(e) => Err(e.to_string()),
  }
}

fn bus_error(pipeline: &gst::Pipeline) -> Option<String> {
  let bus = pipeline.bus()?;
  let message = bus.pop_filtered(&[gst::MessageType::Error])?;
  match message.view() {
    gst::MessageView::Error(err) => Some(match err.debug() {
      Some(debug) => format!("{} ({})", err.error(), debug),
      None => err.error().to_string(),
    }),
    _ => None,
  }
}

fn convert_sample(sample: &gst::Sample, index: u64) -> Result<Frame, InputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| InputError::ReadFailed("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| InputError::ReadFailed("No caps in sample".to_string()))?;

  let video_info = gst_video::VideoInfo::from_caps(caps)
    .map_err(|_| InputError::ReadFailed("Failed to get video info from caps".to_string()))?;

  let bgr = match video_info.format() {
    gst_video::VideoFormat::Rgb => false,
    gst_video::VideoFormat::Bgr => true,
    other => {
      return Err(InputError::ReadFailed(format!(
        "Unsupported video format: {:?}",
        other
      )));
    }
  };

  let map = buffer
    .map_readable()
    .map_err(|e| InputError::ReadFailed(format!("Failed to map buffer for reading: {}", e)))?;
  let offset = video_info.offset()[0];
  let data = map
    .as_slice()
    .get(offset..)
    .ok_or_else(|| InputError::ReadFailed("Buffer shorter than plane offset".to_string()))?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;
  let image = packed_to_rgb_image(data, width, height, stride, bgr).ok_or_else(|| {
    InputError::ReadFailed(format!(
      "Buffer size mismatch: {}x{} stride {}, got {} bytes",
      width,
      height,
      stride,
      data.len()
    ))
  })?;

  let timestamp_ms = buffer.pts().map(|pts| pts.mseconds()).unwrap_or(0);
  Ok(Frame::new(image, index, timestamp_ms))
}

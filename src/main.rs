// 该文件是 Kanjian （看见） 项目的一部分。
// src/main.rs - 桌面程序入口
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

use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::info;

use kanjian::{config::AppConfig, model::YoloParams, output::draw::Draw};

/// 看见：视频与直播流的 YOLO 目标检测查看器
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型权重目录，文件名为 `{模型名小写}.onnx`
  #[arg(long, default_value = "models", value_name = "DIR")]
  pub model_dir: PathBuf,

  /// 人脸库目录
  #[arg(long, default_value = "faces", value_name = "DIR")]
  pub face_db: PathBuf,

  /// 流地址历史文件
  #[arg(long, default_value = "url_history.json", value_name = "FILE")]
  pub history: PathBuf,

  /// 标签字体（TTF/OTF），缺省时使用内嵌字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.25", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.45", value_name = "THRESHOLD")]
  pub iou: f32,

  /// 模型输入尺寸
  #[arg(long, default_value = "640", value_name = "PIXELS")]
  pub input_size: u32,

  /// 打开输入源的超时（秒）
  #[arg(long, default_value = "10", value_name = "SECONDS")]
  pub open_timeout: u64,
}

impl From<Args> for AppConfig {
  fn from(args: Args) -> Self {
    AppConfig {
      model_dir: args.model_dir,
      face_db_dir: args.face_db,
      history_file: args.history,
      font: args.font,
      yolo: YoloParams {
        input_size: args.input_size,
        confidence: args.confidence,
        iou: args.iou,
        ..YoloParams::default()
      },
      open_timeout: Duration::from_secs(args.open_timeout),
      ..AppConfig::default()
    }
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let config = AppConfig::from(Args::parse());
  info!("模型目录: {}", config.model_dir.display());
  info!("人脸库目录: {}", config.face_db_dir.display());
  info!("历史记录: {}", config.history_file.display());

  let draw = match &config.font {
    Some(font) => Draw::with_font_file(font)?,
    None => Draw::with_default_font(),
  };

  kanjian::gui::run(config, draw).map_err(|e| anyhow::anyhow!("界面运行失败: {}", e))?;

  Ok(())
}

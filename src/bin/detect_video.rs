// 该文件是 Kanjian （看见） 项目的一部分。
// src/bin/detect_video.rs - 无界面检测
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

use std::{path::PathBuf, sync::Arc, thread, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use kanjian::{
  FromUrl,
  input::{SourceOptions, SourceSpec, open_source},
  model::YoloBuilder,
  output::{OutputWrapper, draw::Draw},
  task::{ContinuousTask, DetectionTask, Task},
};

/// 对单个视频或直播流运行检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型文件路径
  #[arg(long, value_name = "MODEL")]
  pub model: PathBuf,
  /// 输入来源：本地文件或流地址
  #[arg(long, value_name = "SOURCE")]
  pub input: String,
  /// 输出：`null:` 只记录日志，`folder:///path?always&record=name` 保存标注帧
  #[arg(long, default_value = "null:", value_name = "OUTPUT")]
  pub output: Url,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<u64>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.25", value_name = "THRESHOLD")]
  pub confidence: f32,
  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.45", value_name = "THRESHOLD")]
  pub iou: f32,
  /// 模型输入尺寸
  #[arg(long, default_value = "640", value_name = "PIXELS")]
  pub input_size: u32,
  /// 标签字体，缺省时使用内嵌字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
  /// 打开输入源的超时（秒）
  #[arg(long, default_value = "10", value_name = "SECONDS")]
  pub open_timeout: u64,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model.display());
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let model = YoloBuilder::new(&args.model)
    .confidence(args.confidence)
    .iou(args.iou)
    .input_size(args.input_size)
    .build()?;
  let draw = match &args.font {
    Some(font) => Draw::with_font_file(font)?,
    None => Draw::with_default_font(),
  };
  let output = OutputWrapper::from_url(&args.output)?;

  let spec = SourceSpec::parse(&args.input)?;
  let options = SourceOptions {
    open_timeout: Duration::from_secs(args.open_timeout),
  };
  let source = open_source(&spec, &options)?;

  let task = DetectionTask::new(source, Some(Arc::new(model)), Arc::new(draw));
  let stop = task.stop_handle();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    stop.stop();
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  let frames = ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .run_task(task, &output)?;
  info!("处理完成，共 {} 帧", frames);

  Ok(())
}

// 该文件是 Kanjian （看见） 项目的一部分。
// tests/display_loop.rs - 显示循环集成测试
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
  path::PathBuf,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use image::{Rgb, RgbImage};

use kanjian::{
  app::{DisplayLoop, DisplayState, SourceOpener},
  config::AppConfig,
  frame::Frame,
  history::UrlHistory,
  input::{FrameSource, InputError, SourceSpec},
  model::{CocoLabel, DetectItem, DetectResult, Model, WithLabel},
  output::draw::{Draw, detect_and_annotate},
};

struct VecSource {
  frames: std::vec::IntoIter<Frame>,
  released: Arc<AtomicBool>,
}

impl Iterator for VecSource {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    self.frames.next().map(Ok)
  }
}

impl FrameSource for VecSource {
  fn release(&mut self) {
    self.released.store(true, Ordering::SeqCst);
  }

  fn describe(&self) -> String {
    "vec".to_string()
  }
}

/// 第 1 帧一个检测，第 2 帧没有，第 3 帧报错
struct ThreeFrameModel;

impl Model for ThreeFrameModel {
  type Input = Frame;
  type Output = DetectResult<CocoLabel>;
  type Error = String;

  fn infer(&self, input: &Frame) -> Result<Self::Output, Self::Error> {
    match input.index {
      0 => Ok(DetectResult::from(vec![DetectItem {
        kind: CocoLabel::from_label_id(0),
        score: 0.8,
        bbox: [4.0, 4.0, 20.0, 20.0],
      }])),
      1 => Ok(DetectResult::empty()),
      _ => Err("backend error".to_string()),
    }
  }
}

fn gradient_frame(index: u64) -> Frame {
  let image = RgbImage::from_fn(32, 24, |x, y| Rgb([x as u8 * 8, y as u8 * 10, index as u8]));
  Frame::new(image, index, index * 33)
}

#[test]
fn three_frame_scenario_through_display_loop() {
  let dir = tempfile::tempdir().unwrap();
  let config = AppConfig {
    history_file: dir.path().join("url_history.json"),
    ..AppConfig::default()
  };

  let inputs: Vec<Frame> = (0..3).map(gradient_frame).collect();
  let released = Arc::new(AtomicBool::new(false));
  let source = VecSource {
    frames: inputs.clone().into_iter(),
    released: released.clone(),
  };
  let mut source = Some(source);
  let opener: SourceOpener = Box::new(move |spec: &SourceSpec| {
    source
      .take()
      .map(|s| Box::new(s) as Box<dyn FrameSource>)
      .ok_or_else(|| InputError::cannot_open(spec, "only once"))
  });

  let mut app = DisplayLoop::with_opener(&config, Arc::new(Draw::new(None)), opener);
  app
    .select_source(SourceSpec::File(PathBuf::from("three.mp4")))
    .unwrap();
  app.start(Some(Arc::new(ThreeFrameModel))).unwrap();

  let mut shown = Vec::new();
  while app.is_processing() {
    if let Some(frame) = app.poll() {
      shown.push(frame.frame);
    }
  }

  assert_eq!(shown.len(), 3);
  assert_ne!(shown[0], inputs[0]);
  assert_eq!(shown[1], inputs[1]);
  assert_eq!(shown[2], inputs[2]);
  assert_eq!(app.state(), &DisplayState::Stopped);
  assert!(released.load(Ordering::SeqCst));
}

#[test]
fn zero_detections_and_failures_keep_frame_bit_identical() {
  let draw = Draw::new(None);
  for index in 1..3 {
    let input = gradient_frame(index);
    let output = detect_and_annotate(&draw, input.clone(), &ThreeFrameModel);
    assert_eq!(output.image.as_raw(), input.image.as_raw());
  }
}

#[test]
fn history_append_sequence() {
  let dir = tempfile::tempdir().unwrap();
  let history = UrlHistory::new(dir.path().join("url_history.json"));
  for url in ["http://x", "http://x", "http://y"] {
    history.append(url).unwrap();
  }
  assert_eq!(history.load().unwrap(), vec!["http://x", "http://y"]);
}

#[test]
fn unknown_class_id_has_fallback_label() {
  assert_eq!(CocoLabel::from_label_id(0).to_label_str(), "person");
  assert_eq!(CocoLabel::from_label_id(999).to_label_str(), "Unknown");
}

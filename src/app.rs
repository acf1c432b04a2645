// 该文件是 Kanjian （看见） 项目的一部分。
// src/app.rs - 显示循环状态机
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

//! # 显示循环
//!
//! 界面每次重绘调用一次 [`DisplayLoop::poll`]，循环推进一帧：
//!
//! ```text
//! Idle ──select──▶ SourceSelected ──start──▶ Processing ──▶ Stopped
//!                        │                       │
//!                        └──── 打开失败 ────▶ Errored ◀── 读取失败
//! ```
//!
//! 离开 Processing 的每条路径都会释放输入源。

use std::{fmt, fmt::Display, sync::Arc};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
  config::AppConfig,
  frame::Frame,
  history::UrlHistory,
  input::{FrameSource, InputError, SourceSpec, open_source},
  model::{DetectResult, Model, WithLabel},
  output::draw::{AnnotatedFrame, Draw},
  task::{DetectionTask, TaskEvent},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayState {
  Idle,
  SourceSelected(SourceSpec),
  Processing,
  Stopped,
  Errored(String),
}

impl fmt::Display for DisplayState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DisplayState::Idle => write!(f, "空闲"),
      DisplayState::SourceSelected(spec) => write!(f, "已选择 {}", spec),
      DisplayState::Processing => write!(f, "处理中"),
      DisplayState::Stopped => write!(f, "已停止"),
      DisplayState::Errored(reason) => write!(f, "错误: {}", reason),
    }
  }
}

#[derive(Error, Debug)]
pub enum DisplayError {
  #[error("正在处理中，请先停止")]
  Busy,
  #[error("尚未选择视频或流地址")]
  NoSource,
  #[error(transparent)]
  Input(#[from] InputError),
}

pub type SourceOpener = Box<dyn FnMut(&SourceSpec) -> Result<Box<dyn FrameSource>, InputError>>;

pub struct DisplayLoop<M> {
  state: DisplayState,
  task: Option<DetectionTask<M>>,
  draw: Arc<Draw>,
  history: UrlHistory,
  history_entries: Vec<String>,
  opener: SourceOpener,
  status: String,
}

impl<M> DisplayLoop<M> {
  pub fn new(config: &AppConfig, draw: Arc<Draw>) -> Self {
    let options = config.source_options();
    let opener: SourceOpener = Box::new(move |spec: &SourceSpec| open_source(spec, &options));
    Self::with_opener(config, draw, opener)
  }

  pub fn with_opener(config: &AppConfig, draw: Arc<Draw>, opener: SourceOpener) -> Self {
    let history = UrlHistory::new(&config.history_file);
    let history_entries = history.load().unwrap_or_else(|e| {
      warn!("无法读取历史记录，使用空列表: {}", e);
      Vec::new()
    });

    Self {
      state: DisplayState::Idle,
      task: None,
      draw,
      history,
      history_entries,
      opener,
      status: String::new(),
    }
  }

  pub fn state(&self) -> &DisplayState {
    &self.state
  }

  pub fn status(&self) -> &str {
    &self.status
  }

  pub fn history(&self) -> &[String] {
    &self.history_entries
  }

  pub fn is_processing(&self) -> bool {
    self.state == DisplayState::Processing
  }

  /// 选择输入源；处理中拒绝，终止状态下先回到 Idle
  pub fn select_source(&mut self, spec: SourceSpec) -> Result<(), DisplayError> {
    match self.state {
      DisplayState::Processing => return Err(DisplayError::Busy),
      DisplayState::Stopped | DisplayState::Errored(_) => self.reset(),
      DisplayState::Idle | DisplayState::SourceSelected(_) => {}
    }

    self.status = format!("已选择: {}", spec);
    info!("{}", self.status);
    self.state = DisplayState::SourceSelected(spec);
    Ok(())
  }

  /// 打开输入源并进入 Processing；打开失败进入 Errored
  pub fn start(&mut self, model: Option<Arc<M>>) -> Result<(), DisplayError> {
    let spec = match &self.state {
      DisplayState::SourceSelected(spec) => spec.clone(),
      DisplayState::Processing => return Err(DisplayError::Busy),
      _ => return Err(DisplayError::NoSource),
    };

    let source = match (self.opener)(&spec) {
      Ok(source) => source,
      Err(e) => {
        error!("无法打开 {}: {}", spec, e);
        self.status = format!("无法打开 {}: {}", spec, e);
        self.state = DisplayState::Errored(e.to_string());
        return Err(e.into());
      }
    };

    self.status = format!("正在处理: {}", spec);
    if model.is_none() {
      self.status.push_str("（未加载模型，不做检测）");
    }

    if let SourceSpec::Stream(url) = &spec {
      match self.history.append(url.as_str()) {
        Ok(entries) => self.history_entries = entries,
        Err(e) => {
          warn!("保存历史记录失败: {}", e);
          self.status = format!("{}（保存历史记录失败: {}）", self.status, e);
        }
      }
    }

    info!("{}", self.status);
    self.task = Some(DetectionTask::new(source, model, self.draw.clone()));
    self.state = DisplayState::Processing;
    Ok(())
  }

  /// 请求停止，下一次 `poll` 生效
  pub fn stop(&mut self) {
    if let Some(task) = &self.task {
      info!("请求停止处理");
      task.stop_handle().stop();
    }
  }

  /// 丢弃当前任务并回到 Idle
  pub fn reset(&mut self) {
    self.task = None;
    self.state = DisplayState::Idle;
  }
}

impl<M, T> DisplayLoop<M>
where
  M: Model<Input = Frame, Output = DetectResult<T>>,
  M::Error: Display,
  T: WithLabel,
{
  /// 推进一帧，返回要显示的帧
  pub fn poll(&mut self) -> Option<AnnotatedFrame<T>> {
    if self.state != DisplayState::Processing {
      return None;
    }

    let event = self.task.as_mut().and_then(|task| task.next());
    match event {
      Some(TaskEvent::FrameReady(frame)) => Some(frame),
      Some(TaskEvent::Finished { frames }) | Some(TaskEvent::Cancelled { frames }) => {
        self.status = format!("处理结束，共 {} 帧", frames);
        self.finish(DisplayState::Stopped);
        None
      }
      Some(TaskEvent::Failed(e)) => {
        self.status = format!("错误: {}", e);
        self.finish(DisplayState::Errored(e.to_string()));
        None
      }
      None => {
        self.finish(DisplayState::Stopped);
        None
      }
    }
  }

  fn finish(&mut self, state: DisplayState) {
    self.task = None;
    info!("显示循环: {}", state);
    self.state = state;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    model::CocoLabel,
    output::draw::Annotation,
    task::tests::{ScriptedModel, ScriptedSource, frame},
  };
  use std::{cell::Cell, path::PathBuf, rc::Rc};

  fn config_in(dir: &tempfile::TempDir) -> AppConfig {
    AppConfig {
      history_file: dir.path().join("url_history.json"),
      ..AppConfig::default()
    }
  }

  fn scripted_opener(
    frames: Vec<Result<Frame, InputError>>,
  ) -> (SourceOpener, Rc<Cell<bool>>) {
    let (source, released) = ScriptedSource::new(frames);
    let mut source = Some(source);
    let opener: SourceOpener = Box::new(move |spec: &SourceSpec| match source.take() {
      Some(source) => Ok(Box::new(source) as Box<dyn FrameSource>),
      None => Err(InputError::cannot_open(spec, "已被打开")),
    });
    (opener, released)
  }

  fn drain(app: &mut DisplayLoop<ScriptedModel>) -> Vec<AnnotatedFrame<CocoLabel>> {
    let mut shown = Vec::new();
    while app.is_processing() {
      if let Some(frame) = app.poll() {
        shown.push(frame);
      }
    }
    shown
  }

  #[test]
  fn nonexistent_file_never_enters_processing() {
    let dir = tempfile::tempdir().unwrap();
    let mut app: DisplayLoop<ScriptedModel> =
      DisplayLoop::new(&config_in(&dir), Arc::new(Draw::new(None)));

    app
      .select_source(SourceSpec::File(PathBuf::from("/no/such/video.mp4")))
      .unwrap();
    let result = app.start(Some(Arc::new(ScriptedModel)));

    assert!(matches!(
      result,
      Err(DisplayError::Input(InputError::CannotOpen { .. }))
    ));
    assert!(matches!(app.state(), DisplayState::Errored(_)));
    assert!(app.poll().is_none());
    assert!(!app.is_processing());
  }

  #[test]
  fn three_frame_video_shows_annotated_then_originals() {
    let dir = tempfile::tempdir().unwrap();
    let (opener, released) = scripted_opener(vec![Ok(frame(0)), Ok(frame(1)), Ok(frame(2))]);
    let mut app = DisplayLoop::with_opener(&config_in(&dir), Arc::new(Draw::new(None)), opener);

    app
      .select_source(SourceSpec::File(PathBuf::from("clip.mp4")))
      .unwrap();
    app.start(Some(Arc::new(ScriptedModel))).unwrap();
    let shown = drain(&mut app);

    assert_eq!(shown.len(), 3);
    assert_eq!(shown[0].annotation, Annotation::Annotated(1));
    assert_eq!(shown[1].frame, frame(1));
    assert_eq!(shown[2].frame, frame(2));
    assert_eq!(app.state(), &DisplayState::Stopped);
    assert!(released.get());
  }

  #[test]
  fn stop_is_observed_on_next_poll() {
    let dir = tempfile::tempdir().unwrap();
    let (opener, released) = scripted_opener((0..5).map(|_| Ok(frame(1))).collect());
    let mut app = DisplayLoop::with_opener(&config_in(&dir), Arc::new(Draw::new(None)), opener);

    app
      .select_source(SourceSpec::File(PathBuf::from("clip.mp4")))
      .unwrap();
    app.start(Some(Arc::new(ScriptedModel))).unwrap();
    assert!(app.poll().is_some());

    app.stop();
    assert!(app.poll().is_none());
    assert_eq!(app.state(), &DisplayState::Stopped);
    assert!(released.get());
  }

  #[test]
  fn read_failure_transitions_to_errored() {
    let dir = tempfile::tempdir().unwrap();
    let (opener, released) = scripted_opener(vec![
      Ok(frame(1)),
      Err(InputError::ReadFailed("stream dropped".to_string())),
    ]);
    let mut app = DisplayLoop::with_opener(&config_in(&dir), Arc::new(Draw::new(None)), opener);

    app
      .select_source(SourceSpec::File(PathBuf::from("clip.mp4")))
      .unwrap();
    app.start(Some(Arc::new(ScriptedModel))).unwrap();
    assert_eq!(drain(&mut app).len(), 1);
    assert!(matches!(app.state(), DisplayState::Errored(_)));
    assert!(app.status().contains("stream dropped"));
    assert!(released.get());
  }

  #[test]
  fn stream_open_is_recorded_in_history() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let (opener, _) = scripted_opener(vec![Ok(frame(1))]);
    let mut app: DisplayLoop<ScriptedModel> =
      DisplayLoop::with_opener(&config, Arc::new(Draw::new(None)), opener);

    let url = url::Url::parse("rtsp://camera.local/stream").unwrap();
    app.select_source(SourceSpec::Stream(url)).unwrap();
    app.start(None).unwrap();

    assert_eq!(app.history().to_vec(), vec!["rtsp://camera.local/stream"]);
    assert_eq!(
      UrlHistory::new(&config.history_file).load().unwrap(),
      vec!["rtsp://camera.local/stream"]
    );
  }

  #[test]
  fn selection_rules_follow_state() {
    let dir = tempfile::tempdir().unwrap();
    let (opener, _) = scripted_opener(vec![Ok(frame(1))]);
    let mut app = DisplayLoop::with_opener(&config_in(&dir), Arc::new(Draw::new(None)), opener);

    assert!(matches!(app.start(None), Err(DisplayError::NoSource)));

    app
      .select_source(SourceSpec::File(PathBuf::from("a.mp4")))
      .unwrap();
    app.start(Some(Arc::new(ScriptedModel))).unwrap();
    assert!(matches!(
      app.select_source(SourceSpec::File(PathBuf::from("b.mp4"))),
      Err(DisplayError::Busy)
    ));

    drain(&mut app);
    assert_eq!(app.state(), &DisplayState::Stopped);
    app
      .select_source(SourceSpec::File(PathBuf::from("b.mp4")))
      .unwrap();
    assert_eq!(
      app.state(),
      &DisplayState::SourceSelected(SourceSpec::File(PathBuf::from("b.mp4")))
    );
  }
}

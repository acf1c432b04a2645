// 该文件是 Kanjian （看见） 项目的一部分。
// src/task.rs - 检测任务
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
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::Instant,
};

use tracing::{error, info, warn};

use crate::{
  frame::Frame,
  input::{FrameSource, InputError},
  model::{DetectResult, Model, WithLabel},
  output::{
    Render,
    draw::{AnnotatedFrame, Annotation, Draw},
  },
};

/// 停止信号，每次迭代检查一次
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
  pub fn stop(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_stopped(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

#[derive(Debug)]
pub enum TaskEvent<T> {
  /// 一帧已处理完毕，可以显示
  FrameReady(AnnotatedFrame<T>),
  /// 输入耗尽
  Finished { frames: u64 },
  /// 收到停止信号
  Cancelled { frames: u64 },
  /// 读取失败
  Failed(InputError),
}

/// 可取消的逐帧检测任务
///
/// 每次 `next()` 拉取一帧、检测并标注，产出一个事件。终止事件之后输入源已释放，
/// 迭代器不再产出。没有模型时帧原样透传。
pub struct DetectionTask<M> {
  source: Option<Box<dyn FrameSource>>,
  model: Option<Arc<M>>,
  draw: Arc<Draw>,
  stop: StopHandle,
  frames: u64,
}

impl<M> DetectionTask<M> {
  pub fn new(source: Box<dyn FrameSource>, model: Option<Arc<M>>, draw: Arc<Draw>) -> Self {
    info!("开始任务: {}", source.describe());
    Self {
      source: Some(source),
      model,
      draw,
      stop: StopHandle::default(),
      frames: 0,
    }
  }

  pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
    self.stop = stop;
    self
  }

  pub fn stop_handle(&self) -> StopHandle {
    self.stop.clone()
  }

  pub fn frames(&self) -> u64 {
    self.frames
  }

  pub fn is_running(&self) -> bool {
    self.source.is_some()
  }

  fn release(&mut self) {
    if let Some(mut source) = self.source.take() {
      source.release();
      info!("释放输入源: {}", source.describe());
    }
  }
}

impl<M> Drop for DetectionTask<M> {
  fn drop(&mut self) {
    self.release();
  }
}

impl<M, T> Iterator for DetectionTask<M>
where
  M: Model<Input = Frame, Output = DetectResult<T>>,
  M::Error: Display,
  T: WithLabel,
{
  type Item = TaskEvent<T>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.source.is_none() {
      return None;
    }

    if self.stop.is_stopped() {
      warn!("中断信号接收，退出任务循环");
      self.release();
      return Some(TaskEvent::Cancelled {
        frames: self.frames,
      });
    }

    match self.source.as_mut()?.next() {
      None => {
        info!("输入结束，共处理 {} 帧", self.frames);
        self.release();
        Some(TaskEvent::Finished {
          frames: self.frames,
        })
      }
      Some(Err(e)) => {
        error!("读取帧失败: {}", e);
        self.release();
        Some(TaskEvent::Failed(e))
      }
      Some(Ok(frame)) => {
        self.frames += 1;
        let now = Instant::now();
        let annotated = match self.model.as_deref() {
          Some(model) => self.draw.annotate(frame, model),
          None => AnnotatedFrame {
            frame,
            result: None,
            annotation: Annotation::Empty,
          },
        };
        info!(
          "处理第 {} 帧图像，耗时: {:.2?}",
          annotated.frame.index,
          now.elapsed()
        );
        Some(TaskEvent::FrameReady(annotated))
      }
    }
  }
}

pub trait Task<M, O>: Sized {
  type Error;
  fn run_task(self, task: DetectionTask<M>, output: &O) -> Result<u64, Self::Error>;
}

/// 阻塞地跑完整个任务，把每帧交给输出
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<u64>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<u64>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<M, T, O> Task<M, O> for ContinuousTask
where
  M: Model<Input = Frame, Output = DetectResult<T>>,
  M::Error: Display,
  T: WithLabel,
  O: Render<T>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut task: DetectionTask<M>, output: &O) -> Result<u64, Self::Error> {
    let stop = task.stop_handle();
    let mut total_detections = 0usize;

    while let Some(event) = task.next() {
      match event {
        TaskEvent::FrameReady(frame) => {
          total_detections += frame.detections();
          output.render_result(&frame)?;
          if self.frame_number.is_some_and(|n| task.frames() >= n) {
            info!("达到指定帧数 {}, 退出任务循环", task.frames());
            stop.stop();
          }
        }
        TaskEvent::Finished { frames } | TaskEvent::Cancelled { frames } => {
          info!("任务完成，共 {} 帧，{} 个检测", frames, total_detections);
          return Ok(frames);
        }
        TaskEvent::Failed(e) => return Err(e.into()),
      }
    }

    Ok(task.frames())
  }
}

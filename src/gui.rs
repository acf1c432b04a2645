// 该文件是 Kanjian （看见） 项目的一部分。
// src/gui.rs - 桌面界面
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

use std::{path::PathBuf, sync::Arc};

use eframe::egui;
use tracing::{error, info, warn};

use crate::{
  app::DisplayLoop,
  config::AppConfig,
  face_db::FaceDb,
  frame::Frame,
  input::SourceSpec,
  model::{Yolo, YoloBuilder},
  output::draw::Draw,
};

pub struct KanjianApp {
  config: AppConfig,
  display: DisplayLoop<Yolo>,
  model: Option<Arc<Yolo>>,
  // 只加载，检测流程不使用
  face_db: FaceDb,
  family: String,
  variant: String,
  url_input: String,
  file_input: String,
  message: String,
  texture: Option<egui::TextureHandle>,
}

impl KanjianApp {
  pub fn new(config: AppConfig, draw: Draw) -> Self {
    let display = DisplayLoop::new(&config, Arc::new(draw));
    let face_db = FaceDb::load(&config.face_db_dir).unwrap_or_else(|e| {
      error!("人脸库加载失败，使用空库: {}", e);
      FaceDb::default()
    });

    let (family, variant) = config
      .catalog
      .families
      .first()
      .map(|f| {
        (
          f.name.clone(),
          f.variants.first().cloned().unwrap_or_default(),
        )
      })
      .unwrap_or_default();

    let mut app = Self {
      config,
      display,
      model: None,
      face_db,
      family,
      variant,
      url_input: String::new(),
      file_input: String::new(),
      message: String::new(),
      texture: None,
    };
    app.load_model();
    app
  }

  /// 加载当前选择的模型；失败时不启用检测
  fn load_model(&mut self) {
    if self.variant.is_empty() {
      self.model = None;
      self.message = "未选择模型".to_string();
      return;
    }

    let path = self.config.model_path(&self.variant);
    match YoloBuilder::new(&path).params(self.config.yolo).build() {
      Ok(model) => {
        info!("模型 {} 加载成功 (人脸库 {} 条)", self.variant, self.face_db.len());
        self.model = Some(Arc::new(model));
        self.message = format!("已加载模型 {}", self.variant);
      }
      Err(e) => {
        warn!("模型 {} 加载失败: {}", self.variant, e);
        self.model = None;
        self.message = format!("模型加载失败: {}", e);
      }
    }
  }

  fn selected_source(&self) -> Option<Result<SourceSpec, String>> {
    let url = self.url_input.trim();
    if !url.is_empty() {
      return Some(SourceSpec::parse(url).map_err(|e| e.to_string()));
    }
    let file = self.file_input.trim();
    (!file.is_empty()).then(|| Ok(SourceSpec::File(PathBuf::from(file))))
  }

  fn process(&mut self) {
    let spec = match self.selected_source() {
      Some(Ok(spec)) => spec,
      Some(Err(e)) => {
        self.message = e;
        return;
      }
      None => {
        self.message = "请选择视频文件或输入流地址".to_string();
        return;
      }
    };

    let model = self.model.clone();
    if let Err(e) = self
      .display
      .select_source(spec)
      .and_then(|_| self.display.start(model))
    {
      error!("无法开始处理: {}", e);
      self.message = e.to_string();
    } else {
      self.message.clear();
    }
  }

  fn show_frame(&mut self, ctx: &egui::Context, frame: &Frame) {
    let image = egui::ColorImage::from_rgb(
      [frame.width() as usize, frame.height() as usize],
      frame.image.as_raw(),
    );
    match &mut self.texture {
      Some(texture) => texture.set(image, egui::TextureOptions::LINEAR),
      None => {
        self.texture = Some(ctx.load_texture("frame", image, egui::TextureOptions::LINEAR));
      }
    }
  }

  fn controls(&mut self, ui: &mut egui::Ui) {
    let processing = self.display.is_processing();

    ui.horizontal(|ui| {
      ui.label("流地址");
      ui.add_enabled(
        !processing,
        egui::TextEdit::singleline(&mut self.url_input).hint_text("rtsp://…"),
      );

      let mut picked = None;
      egui::ComboBox::from_id_salt("history")
        .selected_text("历史记录")
        .show_ui(ui, |ui| {
          for url in self.display.history() {
            if ui.selectable_label(false, url).clicked() {
              picked = Some(url.clone());
            }
          }
        });
      if let Some(url) = picked {
        self.url_input = url;
      }
    });

    ui.horizontal(|ui| {
      ui.label("视频文件");
      ui.add_enabled(
        !processing && self.url_input.trim().is_empty(),
        egui::TextEdit::singleline(&mut self.file_input).hint_text("videos/clip.mp4"),
      );
    });

    // 处理中不允许切换模型
    let previous_variant = self.variant.clone();
    ui.add_enabled_ui(!processing, |ui| {
      ui.horizontal(|ui| {
        let previous_family = self.family.clone();
        egui::ComboBox::from_label("系列")
          .selected_text(&self.family)
          .show_ui(ui, |ui| {
            for family in self.config.catalog.families.iter() {
              ui.selectable_value(&mut self.family, family.name.clone(), &family.name);
            }
          });
        if self.family != previous_family {
          self.variant = self
            .config
            .catalog
            .family(&self.family)
            .and_then(|f| f.variants.first().cloned())
            .unwrap_or_default();
        }

        let variants = self
          .config
          .catalog
          .family(&self.family)
          .map(|f| f.variants.clone())
          .unwrap_or_default();
        egui::ComboBox::from_label("模型")
          .selected_text(&self.variant)
          .show_ui(ui, |ui| {
            for variant in variants {
              ui.selectable_value(&mut self.variant, variant.clone(), variant);
            }
          });
      });
    });
    if self.variant != previous_variant {
      self.load_model();
    }

    ui.horizontal(|ui| {
      if ui
        .add_enabled(!processing, egui::Button::new("开始处理"))
        .clicked()
      {
        self.process();
      }
      if ui.add_enabled(processing, egui::Button::new("停止")).clicked() {
        self.display.stop();
      }
    });

    if !self.message.is_empty() {
      ui.label(&self.message);
    }
    ui.label(format!("{} | {}", self.display.state(), self.display.status()));
  }
}

impl eframe::App for KanjianApp {
  fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
    // 文本框未聚焦时按 q 停止
    let stop_key = ctx.input(|i| i.key_pressed(egui::Key::Q))
      && ctx.memory(|m| m.focused().is_none());
    if stop_key {
      self.display.stop();
    }

    if let Some(annotated) = self.display.poll() {
      self.show_frame(ctx, &annotated.frame);
    }

    egui::TopBottomPanel::top("controls").show(ctx, |ui| self.controls(ui));

    egui::CentralPanel::default().show(ctx, |ui| match &self.texture {
      Some(texture) => {
        ui.centered_and_justified(|ui| {
          ui.add(egui::Image::new(texture).shrink_to_fit());
        });
      }
      None => {
        ui.centered_and_justified(|ui| ui.label("尚无画面"));
      }
    });

    if self.display.is_processing() {
      ctx.request_repaint();
    }
  }
}

/// 启动窗口，阻塞到窗口关闭
pub fn run(config: AppConfig, draw: Draw) -> Result<(), eframe::Error> {
  let options = eframe::NativeOptions {
    viewport: egui::ViewportBuilder::default()
      .with_title("看见 · YOLO 目标检测")
      .with_inner_size([960.0, 720.0]),
    ..Default::default()
  };

  eframe::run_native(
    "kanjian",
    options,
    Box::new(move |_cc| Ok(Box::new(KanjianApp::new(config, draw)))),
  )
}

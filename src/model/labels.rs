// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/labels.rs - COCO 类别标签
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

use super::WithLabel;

/// COCO 数据集类别名称，按类别编号排列
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

/// COCO 标签
///
/// 类别编号到标签的映射是全函数：超出已知范围的编号落到 `Unknown`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CocoLabel {
  Known(u8),
  Unknown(u32),
}

impl CocoLabel {
  pub fn name(&self) -> &'static str {
    match self {
      CocoLabel::Known(id) => COCO_CLASSES.get(*id as usize).copied().unwrap_or("Unknown"),
      CocoLabel::Unknown(_) => "Unknown",
    }
  }
}

impl WithLabel for CocoLabel {
  fn to_label_str(&self) -> String {
    self.name().to_string()
  }

  fn to_label_id(&self) -> u32 {
    match self {
      CocoLabel::Known(id) => *id as u32,
      CocoLabel::Unknown(id) => *id,
    }
  }

  fn from_label_id(id: u32) -> Self {
    if (id as usize) < COCO_CLASSES.len() {
      CocoLabel::Known(id as u8)
    } else {
      CocoLabel::Unknown(id)
    }
  }
}

impl std::fmt::Display for CocoLabel {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.name())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn known_ids_map_to_names() {
    assert_eq!(CocoLabel::from_label_id(0).to_label_str(), "person");
    assert_eq!(CocoLabel::from_label_id(79).to_label_str(), "toothbrush");
  }

  #[test]
  fn out_of_range_ids_fall_back_to_unknown() {
    let label = CocoLabel::from_label_id(80);
    assert_eq!(label, CocoLabel::Unknown(80));
    assert_eq!(label.to_label_str(), "Unknown");
    assert_eq!(label.to_label_id(), 80);
  }

  #[test]
  fn hand_built_known_label_past_the_table_is_unknown() {
    let label = CocoLabel::Known(200);
    assert_eq!(label.name(), "Unknown");
    assert_eq!(label.to_string(), "Unknown");
    assert_eq!(label.to_label_id(), 200);
  }
}

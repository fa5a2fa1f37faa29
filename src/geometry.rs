// 该文件是 Qiepian （切片检测） 项目的一部分。
// src/geometry.rs - 边界框几何与输出记录格式
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

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::DetectItem;

/// 模型原生输出的边界框表示
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxGeometry {
  /// 中心点 + 宽高
  CenterSize { cx: f32, cy: f32, w: f32, h: f32 },
  /// 左上角 + 右下角
  Corners {
    x_min: f32,
    y_min: f32,
    x_max: f32,
    y_max: f32,
  },
}

impl BoxGeometry {
  pub fn center_size(cx: f32, cy: f32, w: f32, h: f32) -> Self {
    BoxGeometry::CenterSize { cx, cy, w, h }
  }

  pub fn corners(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
    BoxGeometry::Corners {
      x_min,
      y_min,
      x_max,
      y_max,
    }
  }

  /// 转换为 [x_min, y_min, x_max, y_max]
  pub fn to_corners(&self) -> [f32; 4] {
    match *self {
      BoxGeometry::CenterSize { cx, cy, w, h } => {
        [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]
      }
      BoxGeometry::Corners {
        x_min,
        y_min,
        x_max,
        y_max,
      } => [x_min, y_min, x_max, y_max],
    }
  }

  /// 转换为 [x_top_left, y_top_left, width, height]，不做取整
  pub fn to_tlwh(&self) -> [f32; 4] {
    match *self {
      BoxGeometry::CenterSize { cx, cy, w, h } => [cx - w / 2.0, cy - h / 2.0, w, h],
      BoxGeometry::Corners {
        x_min,
        y_min,
        x_max,
        y_max,
      } => [x_min, y_min, x_max - x_min, y_max - y_min],
    }
  }

  /// 平移边界框，保持原有表示方式
  pub fn translate(&self, dx: f32, dy: f32) -> Self {
    match *self {
      BoxGeometry::CenterSize { cx, cy, w, h } => BoxGeometry::CenterSize {
        cx: cx + dx,
        cy: cy + dy,
        w,
        h,
      },
      BoxGeometry::Corners {
        x_min,
        y_min,
        x_max,
        y_max,
      } => BoxGeometry::Corners {
        x_min: x_min + dx,
        y_min: y_min + dy,
        x_max: x_max + dx,
        y_max: y_max + dy,
      },
    }
  }

  pub fn area(&self) -> f32 {
    let [x1, y1, x2, y2] = self.to_corners();
    (x2 - x1).max(0.0) * (y2 - y1).max(0.0)
  }

  /// 计算两个边界框的 IoU，退化框返回 0
  pub fn iou(&self, other: &BoxGeometry) -> f32 {
    let [ax1, ay1, ax2, ay2] = self.to_corners();
    let [bx1, by1, bx2, by2] = other.to_corners();

    let x1 = ax1.max(bx1);
    let y1 = ay1.max(by1);
    let x2 = ax2.min(bx2);
    let y2 = ay2.min(by2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }

  pub fn is_well_formed(&self) -> bool {
    match *self {
      BoxGeometry::CenterSize { w, h, .. } => w >= 0.0 && h >= 0.0,
      BoxGeometry::Corners {
        x_min,
        y_min,
        x_max,
        y_max,
      } => x_max >= x_min && y_max >= y_min,
    }
  }
}

/// 对外输出的检测记录，bbox 为 [x, y, w, h] 整数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Record {
  pub bbox: [i64; 4],
  pub category_id: u32,
}

impl Record {
  pub fn is_well_formed(&self) -> bool {
    self.bbox[2] >= 0 && self.bbox[3] >= 0
  }
}

impl From<&DetectItem> for Record {
  fn from(item: &DetectItem) -> Self {
    to_record(item)
  }
}

/// 将检测结果转换为输出记录
///
/// 坐标按整数强制转换的语义向零截断。几何不合法（max < min 或宽高为负）时
/// 不做修正，负的宽高会原样出现在记录中。
pub fn to_record(item: &DetectItem) -> Record {
  if !item.bbox.is_well_formed() {
    warn!("检测框几何不合法，原样输出: {:?}", item.bbox);
  }

  let [x, y, w, h] = item.bbox.to_tlwh();
  Record {
    bbox: [x as i64, y as i64, w as i64, h as i64],
    category_id: item.class_id,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn item(bbox: BoxGeometry) -> DetectItem {
    DetectItem {
      class_id: 3,
      score: 0.9,
      bbox,
    }
  }

  #[test]
  fn center_size_to_record() {
    let record = to_record(&item(BoxGeometry::center_size(50.0, 50.0, 20.0, 10.0)));
    assert_eq!(record.bbox, [40, 45, 20, 10]);
    assert_eq!(record.category_id, 3);
  }

  #[test]
  fn corners_to_record() {
    let record = to_record(&item(BoxGeometry::corners(10.0, 10.0, 30.0, 25.0)));
    assert_eq!(record.bbox, [10, 10, 20, 15]);
  }

  #[test]
  fn fractional_coordinates_truncate_toward_zero() {
    let record = to_record(&item(BoxGeometry::corners(-2.7, 3.9, 10.2, 8.8)));
    // x = -2.7 -> -2，w = 12.9 -> 12，h = 4.9 -> 4
    assert_eq!(record.bbox, [-2, 3, 12, 4]);
  }

  #[test]
  fn malformed_corners_propagate_negative_size() {
    let record = to_record(&item(BoxGeometry::corners(30.0, 25.0, 10.0, 10.0)));
    assert_eq!(record.bbox, [30, 25, -20, -15]);
    assert!(!record.is_well_formed());
  }

  #[test]
  fn iou_of_identical_and_disjoint_boxes() {
    let a = BoxGeometry::corners(0.0, 0.0, 10.0, 10.0);
    let b = BoxGeometry::center_size(5.0, 5.0, 10.0, 10.0);
    let c = BoxGeometry::corners(20.0, 20.0, 30.0, 30.0);
    assert!((a.iou(&b) - 1.0).abs() < 1e-6);
    assert_eq!(a.iou(&c), 0.0);
  }

  #[test]
  fn iou_of_half_overlap() {
    let a = BoxGeometry::corners(0.0, 0.0, 10.0, 10.0);
    let b = BoxGeometry::corners(5.0, 0.0, 15.0, 10.0);
    // 交集 50，并集 150
    assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
  }

  #[test]
  fn translate_keeps_representation() {
    let moved = BoxGeometry::center_size(1.0, 2.0, 3.0, 4.0).translate(10.0, 20.0);
    assert_eq!(moved, BoxGeometry::center_size(11.0, 22.0, 3.0, 4.0));
  }

  #[test]
  fn record_serializes_to_public_shape() {
    let record = Record {
      bbox: [1, 2, 3, 4],
      category_id: 7,
    };
    let json = serde_json::to_value(record).unwrap();
    assert_eq!(json, serde_json::json!({"bbox": [1, 2, 3, 4], "category_id": 7}));
  }
}

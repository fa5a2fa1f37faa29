// 该文件是 Qiepian （切片检测） 项目的一部分。
// src/nms.rs - 按类别的贪心非极大值抑制
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

use std::collections::BTreeMap;

use tracing::debug;

use crate::model::DetectItem;

/// 非极大值抑制
///
/// 先按 `class_id` 分组，组内按置信度降序依次保留最高者，并移除与其 IoU
/// 严格大于 `iou_threshold` 的同类检测。不同类别之间互不抑制。
/// 返回结果按置信度降序排列，置信度相同时保持输入顺序。
pub fn nms(items: Vec<DetectItem>, iou_threshold: f32) -> Vec<DetectItem> {
  let total = items.len();

  // 记录输入序号，保证合并各组后的顺序稳定
  let mut groups: BTreeMap<u32, Vec<(usize, DetectItem)>> = BTreeMap::new();
  for (index, item) in items.into_iter().enumerate() {
    groups.entry(item.class_id).or_default().push((index, item));
  }

  let mut kept = Vec::with_capacity(total);
  for (class_id, mut group) in groups {
    group.sort_by(|(ia, a), (ib, b)| b.score.total_cmp(&a.score).then(ia.cmp(ib)));

    let before = group.len();
    let mut candidates = group;
    let mut survivors = 0usize;
    while !candidates.is_empty() {
      let best = candidates.remove(0);
      candidates.retain(|(_, det)| best.1.bbox.iou(&det.bbox) <= iou_threshold);
      kept.push(best);
      survivors += 1;
    }
    debug!("类别 {}: {} 个候选保留 {} 个", class_id, before, survivors);
  }

  kept.sort_by(|(ia, a), (ib, b)| b.score.total_cmp(&a.score).then(ia.cmp(ib)));
  kept.into_iter().map(|(_, item)| item).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::geometry::BoxGeometry;

  fn det(class_id: u32, score: f32, x: f32) -> DetectItem {
    DetectItem {
      class_id,
      score,
      bbox: BoxGeometry::corners(x, 0.0, x + 10.0, 10.0),
    }
  }

  #[test]
  fn suppresses_same_class_overlap() {
    let result = nms(vec![det(0, 0.6, 1.0), det(0, 0.9, 0.0)], 0.45);
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].score, 0.9);
  }

  #[test]
  fn different_classes_never_suppress() {
    let result = nms(vec![det(0, 0.9, 0.0), det(1, 0.9, 0.0)], 0.3);
    assert_eq!(result.len(), 2);
    assert_eq!(result[0].class_id, 0);
    assert_eq!(result[1].class_id, 1);
  }

  #[test]
  fn iou_equal_to_threshold_survives() {
    // 交集 50，并集 150，IoU 恰为 1/3
    let a = det(0, 0.9, 0.0);
    let b = det(0, 0.8, 5.0);
    let iou = a.bbox.iou(&b.bbox);
    let result = nms(vec![a, b], iou);
    assert_eq!(result.len(), 2);
  }

  #[test]
  fn chain_suppression_is_greedy() {
    // a 抑制 b，但 b 不再参与抑制 c
    let a = det(0, 0.9, 0.0);
    let b = det(0, 0.8, 3.0);
    let c = det(0, 0.7, 7.0);
    let result = nms(vec![c, b, a], 0.4);
    let scores: Vec<f32> = result.iter().map(|d| d.score).collect();
    assert_eq!(scores, vec![0.9, 0.7]);
  }

  #[test]
  fn output_is_score_descending() {
    let result = nms(
      vec![det(2, 0.3, 100.0), det(1, 0.8, 50.0), det(0, 0.5, 0.0)],
      0.5,
    );
    let scores: Vec<f32> = result.iter().map(|d| d.score).collect();
    assert_eq!(scores, vec![0.8, 0.5, 0.3]);
  }

  #[test]
  fn empty_input() {
    assert!(nms(Vec::new(), 0.5).is_empty());
  }
}

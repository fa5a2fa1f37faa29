// 该文件是 Qiepian （切片检测） 项目的一部分。
// src/eval/coco.rs - COCO 检测框 mAP 计算
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

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::eval::{CocoDataset, EvalError};

/// "all" 面积范围上限
const AREA_MAX: f64 = 1e10;
const MAX_DETS: usize = 100;

/// 结果文件中的单条预测
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
  pub image_id: u64,
  pub score: f64,
  /// [x, y, w, h]
  pub bbox: [i64; 4],
  pub category_id: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CocoSummary {
  /// AP@[.5:.05:.95]
  pub map: f64,
  pub map_50: f64,
  pub map_75: f64,
}

struct GtBox {
  bbox: [f64; 4],
  area: f64,
  crowd: bool,
}

struct DtBox {
  bbox: [f64; 4],
  area: f64,
  score: f64,
}

/// 单张图像单个类别的匹配结果，`matched`/`ignored` 按 IoU 阈值索引
struct ImageEval {
  scores: Vec<f64>,
  matched: Vec<Vec<bool>>,
  ignored: Vec<Vec<bool>>,
  gt_ignored: Vec<bool>,
}

fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
  let step = (stop - start) / (num - 1) as f64;
  let mut values: Vec<f64> = (0..num).map(|i| i as f64 * step + start).collect();
  values[num - 1] = stop;
  values
}

fn out_of_range(area: f64) -> bool {
  !(0.0..=AREA_MAX).contains(&area)
}

/// 检测框与标注框的 IoU，crowd 标注以检测框面积为并集
fn bbox_iou(dt: &[f64; 4], gt: &[f64; 4], crowd: bool) -> f64 {
  let w = (dt[0] + dt[2]).min(gt[0] + gt[2]) - dt[0].max(gt[0]);
  if w <= 0.0 {
    return 0.0;
  }
  let h = (dt[1] + dt[3]).min(gt[1] + gt[3]) - dt[1].max(gt[1]);
  if h <= 0.0 {
    return 0.0;
  }

  let inter = w * h;
  let dt_area = dt[2] * dt[3];
  let union = if crowd {
    dt_area
  } else {
    dt_area + gt[2] * gt[3] - inter
  };
  inter / union
}

pub struct CocoEvaluator<'a> {
  dataset: &'a CocoDataset,
  iou_thresholds: Vec<f64>,
  recall_thresholds: Vec<f64>,
}

impl<'a> CocoEvaluator<'a> {
  pub fn new(dataset: &'a CocoDataset) -> Self {
    Self {
      dataset,
      iou_thresholds: linspace(0.5, 0.95, 10),
      recall_thresholds: linspace(0.0, 1.0, 101),
    }
  }

  pub fn evaluate(&self, predictions: &[PredictionRecord]) -> Result<CocoSummary, EvalError> {
    let image_ids: BTreeSet<u64> = self.dataset.images.iter().map(|i| i.id).collect();
    let category_ids: BTreeSet<u32> = self.dataset.categories.iter().map(|c| c.id).collect();

    if let Some(p) = predictions.iter().find(|p| !image_ids.contains(&p.image_id)) {
      return Err(EvalError::UnknownImage(p.image_id));
    }

    let mut gts: HashMap<(u64, u32), Vec<GtBox>> = HashMap::new();
    for ann in &self.dataset.annotations {
      if image_ids.contains(&ann.image_id) && category_ids.contains(&ann.category_id) {
        gts.entry((ann.image_id, ann.category_id)).or_default().push(GtBox {
          bbox: ann.bbox,
          area: ann.area(),
          crowd: ann.iscrowd != 0,
        });
      }
    }

    let mut dts: HashMap<(u64, u32), Vec<DtBox>> = HashMap::new();
    for p in predictions {
      if category_ids.contains(&p.category_id) {
        let bbox = p.bbox.map(|v| v as f64);
        dts.entry((p.image_id, p.category_id)).or_default().push(DtBox {
          bbox,
          area: bbox[2] * bbox[3],
          score: p.score,
        });
      }
    }

    // precision[类别][阈值][召回点]，未参与计算的类别为 None
    let precision: Vec<Option<Vec<Vec<f64>>>> = category_ids
      .iter()
      .map(|&category_id| {
        let evals: Vec<ImageEval> = image_ids
          .iter()
          .filter_map(|&image_id| {
            let key = (image_id, category_id);
            self.evaluate_image(
              gts.get(&key).map(Vec::as_slice).unwrap_or_default(),
              dts.get(&key).map(Vec::as_slice).unwrap_or_default(),
            )
          })
          .collect();
        let curve = self.accumulate(&evals);
        if curve.is_none() {
          debug!("类别 {} 无有效标注，不参与平均", category_id);
        }
        curve
      })
      .collect();

    let mean_over = |thresholds: &[usize]| -> f64 {
      let mut sum = 0.0;
      let mut count = 0usize;
      for curve in precision.iter().flatten() {
        for &t in thresholds {
          sum += curve[t].iter().sum::<f64>();
          count += curve[t].len();
        }
      }
      if count == 0 { -1.0 } else { sum / count as f64 }
    };

    let all: Vec<usize> = (0..self.iou_thresholds.len()).collect();
    Ok(CocoSummary {
      map: mean_over(&all),
      map_50: mean_over(&[0]),
      map_75: mean_over(&[5]),
    })
  }

  fn evaluate_image(&self, gt: &[GtBox], dt: &[DtBox]) -> Option<ImageEval> {
    if gt.is_empty() && dt.is_empty() {
      return None;
    }

    // 非忽略标注在前，检测按分数降序，两者均为稳定排序
    let mut gt_order: Vec<usize> = (0..gt.len()).collect();
    gt_order.sort_by_key(|&g| gt[g].crowd || out_of_range(gt[g].area));
    let gt: Vec<&GtBox> = gt_order.iter().map(|&g| &gt[g]).collect();
    let gt_ignored: Vec<bool> = gt.iter().map(|g| g.crowd || out_of_range(g.area)).collect();

    let mut dt_order: Vec<usize> = (0..dt.len()).collect();
    dt_order.sort_by(|&a, &b| dt[b].score.total_cmp(&dt[a].score));
    dt_order.truncate(MAX_DETS);
    let dt: Vec<&DtBox> = dt_order.iter().map(|&d| &dt[d]).collect();

    let ious: Vec<Vec<f64>> = dt
      .iter()
      .map(|d| gt.iter().map(|g| bbox_iou(&d.bbox, &g.bbox, g.crowd)).collect())
      .collect();

    let mut matched = Vec::with_capacity(self.iou_thresholds.len());
    let mut ignored = Vec::with_capacity(self.iou_thresholds.len());
    for &threshold in &self.iou_thresholds {
      let mut gt_matched = vec![false; gt.len()];
      let mut dt_matched = vec![false; dt.len()];
      let mut dt_ignored = vec![false; dt.len()];

      for (d, row) in ious.iter().enumerate() {
        let mut best = threshold.min(1.0 - 1e-10);
        let mut found: Option<usize> = None;
        for (g, &iou) in row.iter().enumerate() {
          if gt_matched[g] && !gt[g].crowd {
            continue;
          }
          // 已匹配到有效标注后，不再考虑被忽略的标注
          if found.is_some_and(|m| !gt_ignored[m]) && gt_ignored[g] {
            break;
          }
          if iou < best {
            continue;
          }
          best = iou;
          found = Some(g);
        }

        if let Some(m) = found {
          dt_ignored[d] = gt_ignored[m];
          dt_matched[d] = true;
          gt_matched[m] = true;
        }
      }

      for (d, det) in dt.iter().enumerate() {
        if !dt_matched[d] && out_of_range(det.area) {
          dt_ignored[d] = true;
        }
      }
      matched.push(dt_matched);
      ignored.push(dt_ignored);
    }

    Some(ImageEval {
      scores: dt.iter().map(|d| d.score).collect(),
      matched,
      ignored,
      gt_ignored,
    })
  }

  /// 汇总单个类别的 precision 曲线，没有有效标注时返回 None
  fn accumulate(&self, evals: &[ImageEval]) -> Option<Vec<Vec<f64>>> {
    let positives = evals
      .iter()
      .flat_map(|e| &e.gt_ignored)
      .filter(|&&ignored| !ignored)
      .count();
    if positives == 0 {
      return None;
    }

    let scores: Vec<f64> = evals.iter().flat_map(|e| e.scores.iter().copied()).collect();
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let curves = (0..self.iou_thresholds.len())
      .map(|t| {
        let matched: Vec<bool> = evals.iter().flat_map(|e| e.matched[t].iter().copied()).collect();
        let ignored: Vec<bool> = evals.iter().flat_map(|e| e.ignored[t].iter().copied()).collect();

        let mut tp = 0.0;
        let mut fp = 0.0;
        let mut recall = Vec::with_capacity(order.len());
        let mut precision = Vec::with_capacity(order.len());
        for &i in &order {
          if !ignored[i] {
            if matched[i] {
              tp += 1.0;
            } else {
              fp += 1.0;
            }
          }
          recall.push(tp / positives as f64);
          precision.push(tp / (tp + fp + f64::EPSILON));
        }

        for i in (1..precision.len()).rev() {
          if precision[i] > precision[i - 1] {
            precision[i - 1] = precision[i];
          }
        }

        let mut sampled = vec![0.0; self.recall_thresholds.len()];
        for (r, &threshold) in self.recall_thresholds.iter().enumerate() {
          let index = recall.partition_point(|&rc| rc < threshold);
          if index >= precision.len() {
            break;
          }
          sampled[r] = precision[index];
        }
        sampled
      })
      .collect();

    Some(curves)
  }
}

/// 预测为空时记 0 分，否则返回 AP@[.5:.05:.95]
pub fn score_cv(predictions: &[PredictionRecord], ground_truth: &CocoDataset) -> Result<f64, EvalError> {
  if predictions.is_empty() {
    return Ok(0.0);
  }
  Ok(CocoEvaluator::new(ground_truth).evaluate(predictions)?.map)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::eval::{CocoAnnotation, CocoCategory, CocoImage};

  fn dataset(annotations: Vec<(u64, u32, [f64; 4], u8)>, categories: &[u32]) -> CocoDataset {
    let images: BTreeSet<u64> = annotations.iter().map(|a| a.0).chain([1]).collect();
    CocoDataset {
      images: images
        .into_iter()
        .map(|id| CocoImage {
          id,
          file_name: format!("{}.jpg", id),
          width: None,
          height: None,
        })
        .collect(),
      annotations: annotations
        .into_iter()
        .enumerate()
        .map(|(i, (image_id, category_id, bbox, iscrowd))| CocoAnnotation {
          id: i as u64 + 1,
          image_id,
          category_id,
          bbox,
          area: None,
          iscrowd,
        })
        .collect(),
      categories: categories
        .iter()
        .map(|&id| CocoCategory {
          id,
          name: String::new(),
        })
        .collect(),
    }
  }

  fn pred(image_id: u64, category_id: u32, bbox: [i64; 4]) -> PredictionRecord {
    PredictionRecord {
      image_id,
      score: 1.0,
      bbox,
      category_id,
    }
  }

  fn assert_close(actual: f64, expected: f64) {
    assert!((actual - expected).abs() < 1e-9, "{} != {}", actual, expected);
  }

  #[test]
  fn perfect_predictions_score_one() {
    let gt = dataset(
      vec![(1, 1, [10.0, 10.0, 20.0, 20.0], 0), (2, 1, [0.0, 0.0, 5.0, 8.0], 0)],
      &[1],
    );
    let preds = vec![pred(1, 1, [10, 10, 20, 20]), pred(2, 1, [0, 0, 5, 8])];
    let summary = CocoEvaluator::new(&gt).evaluate(&preds).unwrap();
    assert_close(summary.map, 1.0);
    assert_close(summary.map_50, 1.0);
    assert_close(summary.map_75, 1.0);
  }

  #[test]
  fn false_positive_after_true_positive() {
    // 两个标注只命中一个: 召回 0.5 之前精度为 1，之后为 0，共 51/101
    let gt = dataset(
      vec![(1, 1, [10.0, 10.0, 20.0, 20.0], 0), (2, 1, [50.0, 50.0, 20.0, 20.0], 0)],
      &[1],
    );
    let preds = vec![pred(1, 1, [10, 10, 20, 20]), pred(2, 1, [10, 10, 20, 20])];
    let summary = CocoEvaluator::new(&gt).evaluate(&preds).unwrap();
    assert_close(summary.map, 51.0 / 101.0);
  }

  #[test]
  fn partial_overlap_counts_at_low_thresholds_only() {
    // IoU = 100 / 160 = 0.625，只在 0.50、0.55、0.60 三个阈值下命中
    let gt = dataset(vec![(1, 1, [0.0, 0.0, 10.0, 16.0], 0)], &[1]);
    let preds = vec![pred(1, 1, [0, 0, 10, 10])];
    let summary = CocoEvaluator::new(&gt).evaluate(&preds).unwrap();
    assert_close(summary.map, 0.3);
    assert_close(summary.map_50, 1.0);
    assert_close(summary.map_75, 0.0);
  }

  #[test]
  fn category_without_ground_truth_is_excluded() {
    let gt = dataset(vec![(1, 1, [10.0, 10.0, 20.0, 20.0], 0)], &[1, 2]);
    let preds = vec![pred(1, 1, [10, 10, 20, 20]), pred(1, 2, [0, 0, 5, 5])];
    let summary = CocoEvaluator::new(&gt).evaluate(&preds).unwrap();
    assert_close(summary.map, 1.0);
  }

  #[test]
  fn detection_on_crowd_region_is_ignored() {
    let gt = dataset(
      vec![
        (1, 1, [10.0, 10.0, 20.0, 20.0], 0),
        (1, 1, [100.0, 100.0, 80.0, 80.0], 1),
      ],
      &[1],
    );
    let preds = vec![pred(1, 1, [10, 10, 20, 20]), pred(1, 1, [110, 110, 10, 10])];
    let summary = CocoEvaluator::new(&gt).evaluate(&preds).unwrap();
    assert_close(summary.map, 1.0);
  }

  #[test]
  fn unknown_category_predictions_are_dropped() {
    let gt = dataset(vec![(1, 1, [10.0, 10.0, 20.0, 20.0], 0)], &[1]);
    let preds = vec![pred(1, 1, [10, 10, 20, 20]), pred(1, 9, [0, 0, 5, 5])];
    assert_close(score_cv(&preds, &gt).unwrap(), 1.0);
  }

  #[test]
  fn unknown_image_is_rejected() {
    let gt = dataset(vec![(1, 1, [10.0, 10.0, 20.0, 20.0], 0)], &[1]);
    let preds = vec![pred(42, 1, [10, 10, 20, 20])];
    assert!(matches!(
      score_cv(&preds, &gt),
      Err(EvalError::UnknownImage(42))
    ));
  }

  #[test]
  fn empty_predictions_score_zero() {
    let gt = dataset(vec![(1, 1, [10.0, 10.0, 20.0, 20.0], 0)], &[1]);
    assert_eq!(score_cv(&[], &gt).unwrap(), 0.0);
  }

  #[test]
  fn thresholds_match_reference_grid() {
    let iou = linspace(0.5, 0.95, 10);
    assert_eq!(iou.len(), 10);
    assert_eq!(iou[0], 0.5);
    assert_eq!(iou[9], 0.95);
    let recall = linspace(0.0, 1.0, 101);
    assert_eq!(recall[50], 0.5);
    assert_eq!(recall[100], 1.0);
  }

  #[test]
  fn crowd_iou_uses_detection_area() {
    let inside = bbox_iou(&[10.0, 10.0, 10.0, 10.0], &[0.0, 0.0, 100.0, 100.0], true);
    assert_close(inside, 1.0);
    let regular = bbox_iou(&[10.0, 10.0, 10.0, 10.0], &[0.0, 0.0, 100.0, 100.0], false);
    assert_close(regular, 0.01);
  }
}

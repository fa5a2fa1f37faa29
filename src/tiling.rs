// 该文件是 Qiepian （切片检测） 项目的一部分。
// src/tiling.rs - 切片推理与结果融合
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

use std::borrow::Cow;
use std::fmt::Display;

use image::RgbImage;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{DetectItem, DetectResult, Model};
use crate::nms::nms;

const DEFAULT_SLICE_SIZE: u32 = 640;
const DEFAULT_OVERLAP_RATIO: f32 = 0.2;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("切片尺寸必须为正数: {0}x{1}")]
  InvalidSliceSize(u32, u32),
  #[error("重叠比例必须在 [0, 1) 内: {0}")]
  InvalidOverlapRatio(f32),
  #[error("IoU 阈值必须在 (0, 1] 内: {0}")]
  InvalidIouThreshold(f32),
  #[error("置信度阈值必须在 [0, 1] 内: {0}")]
  InvalidConfidenceThreshold(f32),
}

/// 切片推理配置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilingConfig {
  pub slice_width: u32,
  pub slice_height: u32,
  pub overlap_width_ratio: f32,
  pub overlap_height_ratio: f32,
  /// 同类检测 IoU 严格大于该值时视为重复
  pub iou_threshold: f32,
  /// 低于该值的检测在融合前丢弃
  pub confidence_threshold: f32,
  /// 关闭时整张图作为唯一切片
  pub slicing: bool,
  /// 多个切片时是否并行推理
  pub parallel: bool,
}

impl Default for TilingConfig {
  fn default() -> Self {
    Self {
      slice_width: DEFAULT_SLICE_SIZE,
      slice_height: DEFAULT_SLICE_SIZE,
      overlap_width_ratio: DEFAULT_OVERLAP_RATIO,
      overlap_height_ratio: DEFAULT_OVERLAP_RATIO,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      slicing: true,
      parallel: true,
    }
  }
}

impl TilingConfig {
  pub fn with_slice_size(mut self, width: u32, height: u32) -> Self {
    self.slice_width = width;
    self.slice_height = height;
    self
  }

  pub fn with_overlap_ratio(mut self, width_ratio: f32, height_ratio: f32) -> Self {
    self.overlap_width_ratio = width_ratio;
    self.overlap_height_ratio = height_ratio;
    self
  }

  pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
    self.iou_threshold = threshold;
    self
  }

  pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn with_slicing(mut self, slicing: bool) -> Self {
    self.slicing = slicing;
    self
  }

  pub fn with_parallel(mut self, parallel: bool) -> Self {
    self.parallel = parallel;
    self
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.slice_width == 0 || self.slice_height == 0 {
      return Err(ConfigError::InvalidSliceSize(
        self.slice_width,
        self.slice_height,
      ));
    }
    for ratio in [self.overlap_width_ratio, self.overlap_height_ratio] {
      if !(0.0..1.0).contains(&ratio) {
        return Err(ConfigError::InvalidOverlapRatio(ratio));
      }
    }
    if !(self.iou_threshold > 0.0 && self.iou_threshold <= 1.0) {
      return Err(ConfigError::InvalidIouThreshold(self.iou_threshold));
    }
    if !(0.0..=1.0).contains(&self.confidence_threshold) {
      return Err(ConfigError::InvalidConfidenceThreshold(
        self.confidence_threshold,
      ));
    }
    Ok(())
  }
}

/// 图像上的矩形子区域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slice {
  pub offset_x: u32,
  pub offset_y: u32,
  pub width: u32,
  pub height: u32,
}

impl Slice {
  fn covers(&self, width: u32, height: u32) -> bool {
    self.offset_x == 0 && self.offset_y == 0 && self.width == width && self.height == height
  }
}

// 单轴切片起点。末尾切片向内平移以保持完整尺寸，尺寸不足一个切片时只有一段。
fn axis_spans(dim: u32, slice: u32, overlap_ratio: f32) -> Vec<(u32, u32)> {
  if dim <= slice {
    return vec![(0, dim)];
  }

  let overlap = (overlap_ratio * slice as f32).floor() as u32;
  let stride = slice.saturating_sub(overlap).max(1);

  let mut spans = Vec::new();
  let mut start = 0u32;
  loop {
    if start + slice >= dim {
      spans.push((dim - slice, slice));
      break;
    }
    spans.push((start, slice));
    start += stride;
  }
  spans
}

/// 按配置将 `width`x`height` 的图像划分为切片，行优先排列
pub fn plan_slices(width: u32, height: u32, config: &TilingConfig) -> Vec<Slice> {
  if width == 0 || height == 0 {
    return Vec::new();
  }

  if !config.slicing {
    return vec![Slice {
      offset_x: 0,
      offset_y: 0,
      width,
      height,
    }];
  }

  let xs = axis_spans(width, config.slice_width, config.overlap_width_ratio);
  let ys = axis_spans(height, config.slice_height, config.overlap_height_ratio);

  let mut slices = Vec::with_capacity(xs.len() * ys.len());
  for &(offset_y, slice_h) in &ys {
    for &(offset_x, slice_w) in &xs {
      slices.push(Slice {
        offset_x,
        offset_y,
        width: slice_w,
        height: slice_h,
      });
    }
  }
  slices
}

/// 切片检测器
///
/// 将大图划分为相互重叠的切片，逐片调用检测模型，把切片内坐标平移回整图，
/// 过滤低置信度结果后做按类别的贪心 NMS，把相邻切片对同一目标的重复检测
/// 融合为一个。单个切片推理失败只记录日志，视为该切片无检测。
#[derive(Debug, Clone, Default)]
pub struct TilingDetector {
  config: TilingConfig,
}

impl TilingDetector {
  pub fn new(config: TilingConfig) -> Result<Self, ConfigError> {
    config.validate()?;
    Ok(Self { config })
  }

  pub fn config(&self) -> &TilingConfig {
    &self.config
  }

  pub fn plan(&self, image: &RgbImage) -> Vec<Slice> {
    let (width, height) = image.dimensions();
    plan_slices(width, height, &self.config)
  }

  /// 对整张图执行切片检测，结果按置信度降序排列
  pub fn detect<M>(&self, image: &RgbImage, model: &M) -> Vec<DetectItem>
  where
    M: Model<Input = RgbImage, Output = DetectResult> + Sync,
    M::Error: Display,
  {
    let slices = self.plan(image);
    info!(
      "图像 {}x{} 划分为 {} 个切片",
      image.width(),
      image.height(),
      slices.len()
    );

    let per_slice: Vec<Vec<DetectItem>> = if self.config.parallel && slices.len() > 1 {
      slices
        .par_iter()
        .map(|slice| run_slice(image, slice, model))
        .collect()
    } else {
      slices
        .iter()
        .map(|slice| run_slice(image, slice, model))
        .collect()
    };

    self.fuse(per_slice.into_iter().flatten().collect())
  }

  /// 与 [`TilingDetector::detect`] 相同，但逐片顺序推理，用于非线程安全的模型
  pub fn detect_sequential<M>(&self, image: &RgbImage, model: &M) -> Vec<DetectItem>
  where
    M: Model<Input = RgbImage, Output = DetectResult>,
    M::Error: Display,
  {
    let slices = self.plan(image);
    debug!("顺序推理 {} 个切片", slices.len());

    let items = slices
      .iter()
      .flat_map(|slice| run_slice(image, slice, model))
      .collect();
    self.fuse(items)
  }

  fn fuse(&self, items: Vec<DetectItem>) -> Vec<DetectItem> {
    let total = items.len();
    let items: Vec<DetectItem> = items
      .into_iter()
      .filter(|item| item.score >= self.config.confidence_threshold)
      .collect();
    debug!(
      "置信度过滤: {} -> {} (阈值 {})",
      total,
      items.len(),
      self.config.confidence_threshold
    );

    let fused = nms(items, self.config.iou_threshold);
    debug!("NMS 融合后剩余 {} 个检测", fused.len());
    fused
  }
}

fn run_slice<M>(image: &RgbImage, slice: &Slice, model: &M) -> Vec<DetectItem>
where
  M: Model<Input = RgbImage, Output = DetectResult>,
  M::Error: Display,
{
  let crop: Cow<'_, RgbImage> = if slice.covers(image.width(), image.height()) {
    Cow::Borrowed(image)
  } else {
    Cow::Owned(
      image::imageops::crop_imm(
        image,
        slice.offset_x,
        slice.offset_y,
        slice.width,
        slice.height,
      )
      .to_image(),
    )
  };

  match model.infer(&crop) {
    Ok(result) => {
      let (dx, dy) = (slice.offset_x as f32, slice.offset_y as f32);
      result
        .items
        .iter()
        .map(|item| DetectItem {
          bbox: item.bbox.translate(dx, dy),
          ..item.clone()
        })
        .collect()
    }
    Err(e) => {
      warn!(
        "切片 ({}, {}, {}x{}) 推理失败，按无检测处理: {}",
        slice.offset_x, slice.offset_y, slice.width, slice.height, e
      );
      Vec::new()
    }
  }
}

// 该文件是 Qiepian （切片检测） 项目的一部分。
// src/args.rs - 命令行公共参数
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

use clap::Args;

use crate::tiling::{ConfigError, TilingConfig, TilingDetector};

#[derive(Args, Debug, Clone)]
pub struct TilingArgs {
  /// 切片宽度（像素）
  #[arg(long, default_value = "640", value_name = "PIXELS")]
  pub slice_width: u32,

  /// 切片高度（像素）
  #[arg(long, default_value = "640", value_name = "PIXELS")]
  pub slice_height: u32,

  /// 水平方向重叠比例 [0.0, 1.0)
  #[arg(long, default_value = "0.2", value_name = "RATIO")]
  pub overlap_width_ratio: f32,

  /// 垂直方向重叠比例 [0.0, 1.0)
  #[arg(long, default_value = "0.2", value_name = "RATIO")]
  pub overlap_height_ratio: f32,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.25", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.45", value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// 关闭切片，整图检测
  #[arg(long)]
  pub no_slicing: bool,

  /// 切片串行检测
  #[arg(long)]
  pub sequential: bool,
}

impl TilingArgs {
  pub fn config(&self) -> TilingConfig {
    TilingConfig::default()
      .with_slice_size(self.slice_width, self.slice_height)
      .with_overlap_ratio(self.overlap_width_ratio, self.overlap_height_ratio)
      .with_confidence_threshold(self.confidence)
      .with_iou_threshold(self.nms_threshold)
      .with_slicing(!self.no_slicing)
      .with_parallel(!self.sequential)
  }

  pub fn detector(&self) -> Result<TilingDetector, ConfigError> {
    TilingDetector::new(self.config())
  }
}

// 该文件是 Qiepian （切片检测） 项目的一部分。
// src/eval/predictor.rs - 预测来源
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

use std::fmt::Display;

use image::RgbImage;
use tracing::warn;

use crate::{
  eval::{EvalError, Instance},
  geometry::Record,
  manager::CvManager,
  model::{DetectResult, Model},
};

/// 一批实例的检测结果来源，返回值与输入按位置对应
pub trait PredictionSource {
  fn predict_batch(&self, batch: &[Instance]) -> Result<Vec<Vec<Record>>, EvalError>;
}

/// 在进程内直接调用检测入口
///
/// 非线程安全的模型可用 [`Exclusive`](crate::model::Exclusive) 包装后使用。
pub struct LocalPredictor<M> {
  manager: CvManager<M>,
}

impl<M> LocalPredictor<M> {
  pub fn new(manager: CvManager<M>) -> Self {
    Self { manager }
  }
}

impl<M> PredictionSource for LocalPredictor<M>
where
  M: Model<Input = RgbImage, Output = DetectResult> + Sync,
  M::Error: Display,
{
  fn predict_batch(&self, batch: &[Instance]) -> Result<Vec<Vec<Record>>, EvalError> {
    Ok(
      batch
        .iter()
        .map(|instance| match instance.decode() {
          Ok(bytes) => self.manager.detect_objects(&bytes),
          Err(e) => {
            warn!("实例 {} 的 base64 无法解码: {}", instance.key, e);
            Vec::new()
          }
        })
        .collect(),
    )
  }
}

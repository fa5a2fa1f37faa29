// 该文件是 Qiepian （切片检测） 项目的一部分。
// src/manager.rs - 检测服务入口
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

use std::convert::Infallible;
use std::fmt::Display;

use image::RgbImage;
use tracing::{debug, error, info, warn};

use crate::{
  frame::{EncodedFrame, decode_rgb},
  geometry::{Record, to_record},
  model::{DetectItem, DetectResult, Model},
  tiling::TilingDetector,
};

/// 检测能力的可用状态
#[derive(Debug)]
pub enum ModelState<M> {
  Ready(M),
  Unavailable { reason: String },
}

/// 对外的检测入口
///
/// 模型初始化失败时进入 `Unavailable` 状态，此后所有调用直接返回空列表。
/// 图像无法解码时同样返回空列表，错误只记录日志，不向调用方抛出。
#[derive(Debug)]
pub struct CvManager<M> {
  state: ModelState<M>,
  detector: TilingDetector,
}

impl<M> CvManager<M> {
  pub fn new(model: M, detector: TilingDetector) -> Self {
    Self {
      state: ModelState::Ready(model),
      detector,
    }
  }

  pub fn unavailable(reason: impl Into<String>, detector: TilingDetector) -> Self {
    Self {
      state: ModelState::Unavailable {
        reason: reason.into(),
      },
      detector,
    }
  }

  /// 由模型加载结果构造，加载失败不会中断进程
  pub fn from_result<E: Display>(model: Result<M, E>, detector: TilingDetector) -> Self {
    match model {
      Ok(model) => {
        info!("检测模型加载完成");
        Self::new(model, detector)
      }
      Err(e) => {
        error!("检测模型加载失败，后续检测将返回空结果: {}", e);
        Self::unavailable(e.to_string(), detector)
      }
    }
  }

  pub fn state(&self) -> &ModelState<M> {
    &self.state
  }

  pub fn is_available(&self) -> bool {
    matches!(self.state, ModelState::Ready(_))
  }

  pub fn detector(&self) -> &TilingDetector {
    &self.detector
  }

  fn ready_model(&self) -> Option<&M> {
    match &self.state {
      ModelState::Ready(model) => Some(model),
      ModelState::Unavailable { reason } => {
        warn!("检测模型不可用 ({})，返回空结果", reason);
        None
      }
    }
  }

  fn format(items: Vec<DetectItem>) -> Vec<Record> {
    let records: Vec<Record> = items.iter().map(to_record).collect();
    debug!("输出 {} 条检测记录", records.len());
    records
  }
}

impl<M> CvManager<M>
where
  M: Model<Input = RgbImage, Output = DetectResult>,
  M::Error: Display,
{
  /// 逐片顺序检测，模型不要求线程安全
  pub fn detect_objects_sequential(&self, image: &[u8]) -> Vec<Record> {
    let Some(model) = self.ready_model() else {
      return Vec::new();
    };

    match decode_rgb(image) {
      Some(image) => Self::format(self.detector.detect_sequential(&image, model)),
      None => Vec::new(),
    }
  }
}

impl<M> CvManager<M>
where
  M: Model<Input = RgbImage, Output = DetectResult> + Sync,
  M::Error: Display,
{
  /// 对编码后的图像字节做目标检测
  pub fn detect_objects(&self, image: &[u8]) -> Vec<Record> {
    let Some(model) = self.ready_model() else {
      return Vec::new();
    };

    match decode_rgb(image) {
      Some(image) => Self::format(self.detector.detect(&image, model)),
      None => Vec::new(),
    }
  }

  /// 对已解码的图像做目标检测
  pub fn detect_image(&self, image: &RgbImage) -> Vec<Record> {
    match self.ready_model() {
      Some(model) => Self::format(self.detector.detect(image, model)),
      None => Vec::new(),
    }
  }
}

impl<M> Model for CvManager<M>
where
  M: Model<Input = RgbImage, Output = DetectResult> + Sync,
  M::Error: Display,
{
  type Input = EncodedFrame;
  type Output = Vec<Record>;
  type Error = Infallible;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    Ok(self.detect_objects(input.as_ref()))
  }
}

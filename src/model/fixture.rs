// 该文件是 Qiepian （切片检测） 项目的一部分。
// src/model/fixture.rs - 固定结果模型
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

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectItem, DetectResult, Model},
};

#[derive(Error, Debug)]
pub enum FixtureModelError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("检测结果文件格式错误: {0}")]
  FormatError(#[from] serde_json::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
}

/// 对任何输入都返回同一组检测结果的模型
///
/// 用于回归测试与评估流程的联调。设置了 `width`/`height` 时，只有尺寸
/// 一致的输入才会得到结果，其余输入返回空结果。
#[derive(Debug, Clone, Default)]
pub struct FixtureModel {
  items: Vec<DetectItem>,
  width: Option<u32>,
  height: Option<u32>,
}

impl FixtureModel {
  pub fn new(items: Vec<DetectItem>) -> Self {
    Self {
      items,
      width: None,
      height: None,
    }
  }

  pub fn with_input_size(mut self, width: u32, height: u32) -> Self {
    self.width = Some(width);
    self.height = Some(height);
    self
  }

  fn accepts(&self, width: u32, height: u32) -> bool {
    self.width.is_none_or(|w| w == width) && self.height.is_none_or(|h| h == height)
  }
}

impl FromUrlWithScheme for FixtureModel {
  const SCHEME: &'static str = "fixture";
}

impl FromUrl for FixtureModel {
  type Error = FixtureModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(FixtureModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    info!("加载检测结果文件: {}", url.path());
    let data = std::fs::read(url.path())?;
    let items: Vec<DetectItem> = serde_json::from_slice(&data)?;
    debug!("共 {} 个固定检测结果", items.len());

    let mut model = FixtureModel::new(items);
    for (k, v) in url.query_pairs() {
      let parsed = v
        .parse::<u32>()
        .map_err(|e| FixtureModelError::ModelPathError(format!("参数 {} 无效: {}", k, e)));
      match k.as_ref() {
        "width" => model.width = Some(parsed?),
        "height" => model.height = Some(parsed?),
        _ => debug!("忽略未知参数: {}", k),
      }
    }

    Ok(model)
  }
}

impl Model for FixtureModel {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = FixtureModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let (width, height) = input.dimensions();
    if !self.accepts(width, height) {
      debug!("输入尺寸 {}x{} 不匹配，返回空结果", width, height);
      return Ok(DetectResult::default());
    }
    Ok(DetectResult::from(self.items.clone()))
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use tempfile::NamedTempFile;

  use super::*;
  use crate::geometry::BoxGeometry;

  #[test]
  fn loads_detections_from_url() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
      file,
      r#"[
        {{"class_id": 1, "score": 0.8, "bbox": {{"center_size": {{"cx": 5, "cy": 5, "w": 2, "h": 2}}}}}},
        {{"class_id": 2, "score": 0.6, "bbox": {{"corners": {{"x_min": 0, "y_min": 0, "x_max": 4, "y_max": 3}}}}}}
      ]"#
    )
    .unwrap();

    let url = Url::parse(&format!("fixture://{}", file.path().display())).unwrap();
    let model = FixtureModel::from_url(&url).unwrap();
    let result = model.infer(&RgbImage::new(8, 8)).unwrap();

    assert_eq!(result.len(), 2);
    assert_eq!(result.items[0].bbox, BoxGeometry::center_size(5.0, 5.0, 2.0, 2.0));
    assert_eq!(result.items[1].class_id, 2);
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("file:///tmp/whatever.json").unwrap();
    assert!(matches!(
      FixtureModel::from_url(&url),
      Err(FixtureModelError::ModelPathError(_))
    ));
  }

  #[test]
  fn size_filter_skips_other_inputs() {
    let model = FixtureModel::new(vec![DetectItem {
      class_id: 0,
      score: 0.5,
      bbox: BoxGeometry::corners(0.0, 0.0, 1.0, 1.0),
    }])
    .with_input_size(4, 4);

    assert_eq!(model.infer(&RgbImage::new(4, 4)).unwrap().len(), 1);
    assert!(model.infer(&RgbImage::new(5, 4)).unwrap().is_empty());
  }
}

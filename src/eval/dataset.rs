// 该文件是 Qiepian （切片检测） 项目的一部分。
// src/eval/dataset.rs - COCO 标注与请求实例
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

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::eval::EvalError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocoImage {
  pub id: u64,
  pub file_name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub width: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub height: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocoAnnotation {
  pub id: u64,
  pub image_id: u64,
  pub category_id: u32,
  /// [x, y, w, h]
  pub bbox: [f64; 4],
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub area: Option<f64>,
  #[serde(default)]
  pub iscrowd: u8,
}

impl CocoAnnotation {
  /// 标注面积，缺省时按 bbox 计算
  pub fn area(&self) -> f64 {
    self.area.unwrap_or(self.bbox[2] * self.bbox[3])
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocoCategory {
  pub id: u32,
  #[serde(default)]
  pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CocoDataset {
  pub images: Vec<CocoImage>,
  #[serde(default)]
  pub annotations: Vec<CocoAnnotation>,
  #[serde(default)]
  pub categories: Vec<CocoCategory>,
}

impl CocoDataset {
  pub fn load(path: &Path) -> Result<Self, EvalError> {
    let data = std::fs::read(path)?;
    let dataset: CocoDataset = serde_json::from_slice(&data)?;
    debug!(
      "标注: {} 张图像, {} 个标注, {} 个类别",
      dataset.images.len(),
      dataset.annotations.len(),
      dataset.categories.len()
    );
    Ok(dataset)
  }
}

/// 发送给检测服务的单个请求实例
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
  pub key: u64,
  pub b64: String,
}

impl Instance {
  pub fn from_bytes(key: u64, data: &[u8]) -> Self {
    Self {
      key,
      b64: STANDARD.encode(data),
    }
  }

  pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(&self.b64)
  }
}

fn read_instance(data_dir: &Path, image: &CocoImage) -> Result<Instance, EvalError> {
  let data = std::fs::read(data_dir.join("images").join(&image.file_name))?;
  Ok(Instance::from_bytes(image.id, &data))
}

/// 按标注顺序每 `batch_size` 张图像组成一批，读取延迟到迭代时进行
pub fn batches<'a>(
  images: &'a [CocoImage],
  data_dir: &'a Path,
  batch_size: usize,
) -> impl Iterator<Item = Result<Vec<Instance>, EvalError>> + 'a {
  images.chunks(batch_size.max(1)).map(move |chunk| {
    chunk
      .iter()
      .map(|image| read_instance(data_dir, image))
      .collect()
  })
}

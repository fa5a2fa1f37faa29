// 该文件是 Qiepian （切片检测） 项目的一部分。
// src/eval.rs - 检测结果评估
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

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

mod coco;
mod dataset;
#[cfg(feature = "http_client")]
mod http;
mod predictor;

pub use self::coco::{CocoEvaluator, CocoSummary, PredictionRecord, score_cv};
pub use self::dataset::{CocoAnnotation, CocoCategory, CocoDataset, CocoImage, Instance, batches};
#[cfg(feature = "http_client")]
pub use self::http::HttpPredictor;
pub use self::predictor::{LocalPredictor, PredictionSource};

/// 每次请求的图像数
pub const BATCH_SIZE: usize = 16;

#[derive(Error, Debug)]
pub enum EvalError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[cfg(feature = "http_client")]
  #[error("HTTP 请求错误: {0}")]
  HttpError(#[from] reqwest::Error),
  #[error("端点地址错误: {0}")]
  EndpointError(String),
  #[error("预测结果引用了标注中不存在的图像: {0}")]
  UnknownImage(u64),
}

#[derive(Debug, Clone)]
pub struct EvalConfig {
  /// 包含 `annotations.json` 与 `images/` 的数据目录
  pub data_dir: PathBuf,
  pub results_dir: PathBuf,
  pub batch_size: usize,
}

impl Default for EvalConfig {
  fn default() -> Self {
    Self {
      data_dir: PathBuf::from("data/cv"),
      results_dir: PathBuf::from("results"),
      batch_size: BATCH_SIZE,
    }
  }
}

#[derive(Debug, Clone)]
pub struct EvalReport {
  pub predictions: Vec<PredictionRecord>,
  pub results_path: PathBuf,
  pub summary: CocoSummary,
}

/// 批量请求检测结果，保存结果文件并计算 mAP@[.5:.05:.95]
pub fn run_evaluation<P: PredictionSource>(
  config: &EvalConfig,
  predictor: &P,
) -> Result<EvalReport, EvalError> {
  let annotations_path = config.data_dir.join("annotations.json");
  info!("加载标注文件: {}", annotations_path.display());
  let dataset = CocoDataset::load(&annotations_path)?;

  let batch_size = config.batch_size.max(1);
  let total = dataset.images.len().div_ceil(batch_size);
  let mut predictions = Vec::new();

  for (index, batch) in batches(&dataset.images, &config.data_dir, batch_size).enumerate() {
    let batch = batch?;
    let batch_preds = predictor.predict_batch(&batch)?;
    if batch_preds.len() != batch.len() {
      warn!(
        "第 {} 批: 请求 {} 张图像，返回 {} 组结果，多余部分被忽略",
        index + 1,
        batch.len(),
        batch_preds.len()
      );
    }

    for (instance, detections) in batch.iter().zip(batch_preds) {
      predictions.extend(detections.into_iter().map(|record| PredictionRecord {
        image_id: instance.key,
        score: 1.0,
        bbox: record.bbox,
        category_id: record.category_id,
      }));
    }
    info!("批次 {}/{} 完成，累计 {} 条预测", index + 1, total, predictions.len());
  }

  let results_path = save_results(&config.results_dir, &predictions)?;

  let summary = if predictions.is_empty() {
    CocoSummary::default()
  } else {
    CocoEvaluator::new(&dataset).evaluate(&predictions)?
  };
  info!("mAP@.5:.05:.95: {:.6}", summary.map);

  Ok(EvalReport {
    predictions,
    results_path,
    summary,
  })
}

fn save_results(results_dir: &Path, predictions: &[PredictionRecord]) -> Result<PathBuf, EvalError> {
  std::fs::create_dir_all(results_dir)?;
  let results_path = results_dir.join(format!(
    "cv_results_{}.json",
    chrono::Local::now().format("%Y%m%d_%H%M%S")
  ));
  info!("保存测试结果到 {}", results_path.display());

  let mut writer = BufWriter::new(File::create(&results_path)?);
  serde_json::to_writer(&mut writer, predictions)?;
  writer.flush()?;
  Ok(results_path)
}

// 该文件是 Qiepian （切片检测） 项目的一部分。
// src/bin/evaluate.rs - COCO mAP 评估
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use url::Url;

use qiepian::{
  CvManager, FromUrl,
  args::TilingArgs,
  eval::{BATCH_SIZE, EvalConfig, EvalReport, LocalPredictor, run_evaluation},
  model::FixtureModel,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 数据目录，包含 annotations.json 与 images/
  #[arg(long, default_value = "data/cv", value_name = "DIR")]
  pub data_dir: PathBuf,
  /// 结果文件目录
  #[arg(long, default_value = "results", value_name = "DIR")]
  pub results_dir: PathBuf,
  /// 每次请求的图像数
  #[arg(long, default_value_t = BATCH_SIZE, value_name = "COUNT")]
  pub batch_size: usize,

  /// 检测服务地址
  #[arg(long, default_value = "http://localhost:5002/cv", value_name = "URL")]
  pub endpoint: Url,
  /// 请求超时（秒），缺省时不限制
  #[arg(long, value_name = "SECONDS")]
  pub timeout: Option<u64>,

  /// 指定后在进程内检测，不再请求服务
  #[arg(long, value_name = "MODEL")]
  pub model: Option<Url>,

  #[command(flatten)]
  pub tiling: TilingArgs,
}

#[cfg(feature = "http_client")]
fn evaluate_remote(args: &Args, config: &EvalConfig) -> Result<EvalReport> {
  let mut predictor = qiepian::eval::HttpPredictor::from_url(&args.endpoint)?;
  if let Some(seconds) = args.timeout {
    predictor = predictor.with_timeout(std::time::Duration::from_secs(seconds))?;
  }
  info!("检测服务地址: {}", predictor.endpoint());
  Ok(run_evaluation(config, &predictor)?)
}

#[cfg(not(feature = "http_client"))]
fn evaluate_remote(_args: &Args, _config: &EvalConfig) -> Result<EvalReport> {
  anyhow::bail!("未启用 http_client 特性，请使用 --model 在进程内检测")
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  let config = EvalConfig {
    data_dir: args.data_dir.clone(),
    results_dir: args.results_dir.clone(),
    batch_size: args.batch_size,
  };
  info!("数据目录: {}", config.data_dir.display());

  let report = match &args.model {
    Some(model) => {
      info!("进程内检测，模型地址: {}", model);
      let manager = CvManager::from_result(FixtureModel::from_url(model), args.tiling.detector()?);
      info!("切片配置: {:?}", manager.detector().config());
      run_evaluation(&config, &LocalPredictor::new(manager))?
    }
    None => evaluate_remote(&args, &config)?,
  };

  info!("结果文件: {}", report.results_path.display());
  info!(
    "mAP@.5:.95 = {:.4}, AP50 = {:.4}, AP75 = {:.4}",
    report.summary.map, report.summary.map_50, report.summary.map_75
  );
  println!("{}", report.summary.map);

  Ok(())
}

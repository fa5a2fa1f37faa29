// 该文件是 Qiepian （切片检测） 项目的一部分。
// src/output/json_record.rs - JSON 记录输出
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
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, frame::EncodedFrame, geometry::Record, output::Render,
};

#[derive(Error, Debug)]
pub enum JsonRecordOutputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 单帧的检测记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecords {
  pub key: String,
  pub predictions: Vec<Record>,
}

/// 把所有帧的检测记录写入同一个 JSON 文件
///
/// 每渲染一帧就整体重写一次文件，任务中途退出时已处理的帧不会丢失。
pub struct JsonRecordOutput {
  path: PathBuf,
  frames: Mutex<Vec<FrameRecords>>,
}

impl FromUrlWithScheme for JsonRecordOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonRecordOutput {
  type Error = JsonRecordOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        uri.scheme()
      );
      return Err(JsonRecordOutputError::SchemeMismatch(format!(
        "期望输出方式 '{}', 实际输出方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(JsonRecordOutput {
      path: PathBuf::from(uri.path()),
      frames: Mutex::new(Vec::new()),
    })
  }
}

impl JsonRecordOutput {
  pub fn path(&self) -> &Path {
    &self.path
  }

  fn save(&self, frames: &[FrameRecords]) -> Result<(), JsonRecordOutputError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let mut writer = BufWriter::new(File::create(&self.path)?);
    serde_json::to_writer(&mut writer, frames)?;
    writer.flush()?;
    debug!("写入 {} 帧检测记录到 {}", frames.len(), self.path.display());
    Ok(())
  }
}

impl Render<EncodedFrame, Vec<Record>> for JsonRecordOutput {
  type Error = JsonRecordOutputError;

  fn render_result(&self, frame: &EncodedFrame, result: &Vec<Record>) -> Result<(), Self::Error> {
    let mut frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
    frames.push(FrameRecords {
      key: frame.key.clone(),
      predictions: result.clone(),
    });
    self.save(&frames)
  }
}

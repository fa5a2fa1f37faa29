// 该文件是 Qiepian （切片检测） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme, frame::EncodedFrame, geometry::Record, output::Render,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 每帧写一个 `<key>.txt`，每行为 `category_id, x, y, w, h`
///
/// 默认跳过没有检测结果的帧，URL 带 `always` 参数时也写出空文件。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      always,
    })
  }
}

fn format_records(records: &[Record]) -> String {
  records
    .iter()
    .map(|r| {
      format!(
        "{}, {}, {}, {}, {}",
        r.category_id, r.bbox[0], r.bbox[1], r.bbox[2], r.bbox[3]
      )
    })
    .collect::<Vec<_>>()
    .join("\n")
}

impl Render<EncodedFrame, Vec<Record>> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &EncodedFrame, result: &Vec<Record>) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      return Ok(());
    }

    std::fs::create_dir_all(&self.directory)?;
    let path = self.directory.join(format!("{}.txt", frame.key));
    std::fs::write(&path, format_records(result))?;
    debug!("写入 {} 条记录到 {}", result.len(), path.display());
    Ok(())
  }
}

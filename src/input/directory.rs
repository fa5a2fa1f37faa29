// 该文件是 Qiepian （切片检测） 项目的一部分。
// src/input/directory.rs - 图像目录输入
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
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::EncodedFrame,
  input::{frame_key, is_image_file},
};

#[derive(Error, Debug)]
pub enum DirectoryInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 按文件名顺序逐个读取目录中的图像文件
///
/// 读取失败的文件记录日志后跳过。
pub struct DirectoryInput {
  files: std::vec::IntoIter<PathBuf>,
}

impl FromUrlWithScheme for DirectoryInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryInput {
  type Error = DirectoryInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(DirectoryInputError::SchemeMismatch);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(url.path())? {
      let path = entry?.path();
      if path.is_file() && is_image_file(&path) {
        files.push(path);
      }
    }
    files.sort();
    info!("目录 {} 中共有 {} 个图像文件", url.path(), files.len());

    Ok(DirectoryInput {
      files: files.into_iter(),
    })
  }
}

impl DirectoryInput {
  pub fn remaining(&self) -> usize {
    self.files.len()
  }
}

impl Iterator for DirectoryInput {
  type Item = EncodedFrame;

  fn next(&mut self) -> Option<Self::Item> {
    for path in self.files.by_ref() {
      match std::fs::read(&path) {
        Ok(data) => {
          let frame = EncodedFrame::new(frame_key(&path), data);
          if frame.is_empty() {
            warn!("{} 为空文件，跳过", path.display());
            continue;
          }
          debug!("读取 {} ({} 字节)", path.display(), frame.len());
          return Some(frame);
        }
        Err(e) => warn!("读取 {} 失败，跳过: {}", path.display(), e),
      }
    }
    None
  }
}

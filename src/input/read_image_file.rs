// 该文件是 Qiepian （切片检测） 项目的一部分。
// src/input/read_image_file.rs - 单个图像文件输入
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

use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::EncodedFrame, input::frame_key};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
}

/// 读取单个图像文件，只产生一帧
///
/// 文件内容以原始字节交给模型，解码放在检测入口处完成。
pub struct ImageFileInput {
  frame: Option<EncodedFrame>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = Path::new(url.path());
    let frame = EncodedFrame::new(frame_key(path), std::fs::read(path)?);
    debug!("读取图像文件 {} ({} 字节)", path.display(), frame.len());

    Ok(ImageFileInput { frame: Some(frame) })
  }
}

impl Iterator for ImageFileInput {
  type Item = EncodedFrame;

  fn next(&mut self) -> Option<Self::Item> {
    self.frame.take()
  }
}

// 该文件是 Qiepian （切片检测） 项目的一部分。
// src/frame.rs - 编码帧定义
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
use tracing::warn;

/// 尚未解码的图像帧
#[derive(Debug, Clone)]
pub struct EncodedFrame {
  /// 帧标识，通常为文件名（不含扩展名）
  pub key: String,
  data: Box<[u8]>,
}

impl EncodedFrame {
  pub fn new(key: impl Into<String>, data: Vec<u8>) -> Self {
    Self {
      key: key.into(),
      data: data.into_boxed_slice(),
    }
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  /// 解码为 RGB 图像，失败时返回 `None`
  pub fn decode(&self) -> Option<RgbImage> {
    decode_rgb(&self.data)
  }
}

impl AsRef<[u8]> for EncodedFrame {
  fn as_ref(&self) -> &[u8] {
    &self.data
  }
}

/// 按内容猜测格式解码图像字节
pub fn decode_rgb(bytes: &[u8]) -> Option<RgbImage> {
  match image::load_from_memory(bytes) {
    Ok(image) => Some(image.to_rgb8()),
    Err(e) => {
      warn!("无法从字节解码图像 ({} 字节): {}", bytes.len(), e);
      None
    }
  }
}

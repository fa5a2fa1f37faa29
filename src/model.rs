// 该文件是 Qiepian （切片检测） 项目的一部分。
// src/model.rs - 检测模型
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

use std::marker::PhantomData;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::geometry::BoxGeometry;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: BoxGeometry,
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 以闭包作为检测能力
pub struct FnModel<F, I> {
  func: F,
  _phantom: PhantomData<fn(&I)>,
}

impl<F, I> FnModel<F, I> {
  pub fn new(func: F) -> Self {
    Self {
      func,
      _phantom: PhantomData,
    }
  }
}

impl<F, I, E> Model for FnModel<F, I>
where
  F: Fn(&I) -> Result<DetectResult, E>,
{
  type Input = I;
  type Output = DetectResult;
  type Error = E;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    (self.func)(input)
  }
}

/// 以互斥锁包装非线程安全的模型，使其满足并行切片推理的 `Sync` 要求
///
/// 各切片的推理会依次获得锁，实际上仍是串行执行。
pub struct Exclusive<M> {
  model: Mutex<M>,
}

impl<M> Exclusive<M> {
  pub fn new(model: M) -> Self {
    Self {
      model: Mutex::new(model),
    }
  }

  pub fn into_inner(self) -> M {
    self.model.into_inner().unwrap_or_else(PoisonError::into_inner)
  }
}

impl<M: Model> Model for Exclusive<M> {
  type Input = M::Input;
  type Output = M::Output;
  type Error = M::Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self
      .model
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .infer(input)
  }
}

mod fixture;
pub use self::fixture::{FixtureModel, FixtureModelError};

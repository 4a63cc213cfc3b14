// 该文件是 Xunfeng （巡蜂） 项目的一部分。
// src/lib.rs - 库主文件
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

pub mod args;
pub mod config;
pub mod frame;
pub mod input;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod stabilizer;
pub mod task;
pub mod worker;

use std::str::FromStr;

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}

/// 查询参数解析失败时返回 `(参数名, 原始值)`
pub(crate) fn query_value<T: FromStr>(
  url: &url::Url,
  name: &'static str,
) -> Result<Option<T>, (&'static str, String)> {
  match url.query_pairs().find(|(k, _)| k == name) {
    Some((_, v)) => v
      .parse::<T>()
      .map(Some)
      .map_err(|_| (name, v.into_owned())),
    None => Ok(None),
  }
}

pub(crate) fn query_flag(url: &url::Url, name: &str) -> bool {
  url.query_pairs().any(|(k, _)| k == name)
}

// 该文件是 Kanjian （看见） 项目的一部分。
// src/bin/upload.rs - 上传文件到对象存储
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

use anyhow::{Result, bail};
use clap::Parser;
use tracing::info;
use url::Url;

use kanjian::{
  FromUrl,
  upload::{UploadTarget, upload_file},
};

/// 上传本地文件到 S3 兼容存储
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 本地文件
  #[arg(value_name = "FILE")]
  pub file: PathBuf,
  /// 目标 `s3://bucket/path`，路径为空或以 `/` 结尾时追加文件名
  #[arg(value_name = "TARGET")]
  pub target: Url,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let mut target = UploadTarget::from_url(&args.target)?;
  if target.key.is_empty() || target.key.ends_with('/') {
    let name = args
      .file
      .file_name()
      .and_then(|n| n.to_str())
      .ok_or_else(|| anyhow::anyhow!("无法确定文件名: {}", args.file.display()))?;
    target.key.push_str(name);
  }

  info!("上传 {} 到 {}/{}", args.file.display(), target.bucket, target.key);
  if !upload_file(&args.file, &target.bucket, &target.key) {
    bail!("上传失败");
  }

  Ok(())
}

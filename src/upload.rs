// 该文件是 Kanjian （看见） 项目的一部分。
// src/upload.rs - 对象存储上传
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

//! # 对象存储上传
//!
//! 以 AWS Signature V4 签名的 `PUT` 请求把本地文件上传到 S3 兼容存储。
//!
//! 凭据与区域读取自环境变量：
//! - `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`，可选 `AWS_SESSION_TOKEN`
//! - `AWS_REGION` 或 `AWS_DEFAULT_REGION`，默认 `us-east-1`
//! - `AWS_ENDPOINT_URL`：自定义端点，使用 path-style 地址

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "s3";
const DEFAULT_REGION: &str = "us-east-1";

#[derive(Error, Debug)]
pub enum UploadError {
  #[error("文件不存在: {0}")]
  FileNotFound(PathBuf),
  #[error("缺少对象存储凭据")]
  MissingCredentials,
  #[error("上传失败: {0}")]
  Other(String),
}

#[derive(Debug, Clone)]
pub struct Credentials {
  pub access_key_id: String,
  pub secret_access_key: String,
  pub session_token: Option<String>,
}

impl Credentials {
  pub fn from_env() -> Option<Self> {
    let access_key_id = non_empty_env("AWS_ACCESS_KEY_ID")?;
    let secret_access_key = non_empty_env("AWS_SECRET_ACCESS_KEY")?;
    Some(Self {
      access_key_id,
      secret_access_key,
      session_token: non_empty_env("AWS_SESSION_TOKEN"),
    })
  }
}

fn non_empty_env(key: &str) -> Option<String> {
  std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// 上传目标 `s3://bucket/path/to/key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
  pub bucket: String,
  pub key: String,
}

impl FromUrlWithScheme for UploadTarget {
  const SCHEME: &'static str = "s3";
}

impl FromUrl for UploadTarget {
  type Error = UploadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(UploadError::Other(format!(
        "URI scheme 不匹配: {}",
        url.scheme()
      )));
    }
    let bucket = url
      .host_str()
      .filter(|b| !b.is_empty())
      .ok_or_else(|| UploadError::Other(format!("缺少 bucket: {}", url)))?;
    let key = url.path().trim_start_matches('/');
    let key = urlencoding::decode(key)
      .map_err(|e| UploadError::Other(format!("无效的对象路径 {}: {}", key, e)))?;

    Ok(Self {
      bucket: bucket.to_string(),
      key: key.into_owned(),
    })
  }
}

/// 签好名、可以直接发送的请求
#[derive(Debug)]
struct SignedRequest {
  url: String,
  headers: Vec<(String, String)>,
}

/// S3 兼容对象存储客户端
#[derive(Debug, Clone)]
pub struct ObjectStorage {
  region: String,
  endpoint: Option<Url>,
  credentials: Option<Credentials>,
}

impl ObjectStorage {
  pub fn new(
    region: impl Into<String>,
    endpoint: Option<Url>,
    credentials: Option<Credentials>,
  ) -> Self {
    Self {
      region: region.into(),
      endpoint,
      credentials,
    }
  }

  pub fn from_env() -> Self {
    let region = non_empty_env("AWS_REGION")
      .or_else(|| non_empty_env("AWS_DEFAULT_REGION"))
      .unwrap_or_else(|| DEFAULT_REGION.to_string());
    let endpoint = non_empty_env("AWS_ENDPOINT_URL").and_then(|e| match Url::parse(&e) {
      Ok(url) => Some(url),
      Err(err) => {
        error!("忽略无效的 AWS_ENDPOINT_URL {}: {}", e, err);
        None
      }
    });
    Self::new(region, endpoint, Credentials::from_env())
  }

  pub fn upload(
    &self,
    local_path: impl AsRef<Path>,
    bucket: &str,
    remote_path: &str,
  ) -> Result<(), UploadError> {
    let local_path = local_path.as_ref();
    if !local_path.is_file() {
      return Err(UploadError::FileNotFound(local_path.to_path_buf()));
    }
    let credentials = self
      .credentials
      .as_ref()
      .ok_or(UploadError::MissingCredentials)?;

    let body = std::fs::read(local_path)
      .map_err(|e| UploadError::Other(format!("读取 {} 失败: {}", local_path.display(), e)))?;
    let payload_hash = hex::encode(Sha256::digest(&body));
    let request = self.sign_put(credentials, bucket, remote_path, &payload_hash, Utc::now())?;

    let mut put = ureq::put(&request.url);
    for (name, value) in request.headers.iter() {
      put = put.set(name, value);
    }
    match put.send_bytes(&body) {
      Ok(response) => {
        info!(
          "文件 {} 已上传到 {}/{} ({})",
          local_path.display(),
          bucket,
          remote_path,
          response.status()
        );
        Ok(())
      }
      Err(ureq::Error::Status(code, response)) => {
        let detail = response.into_string().unwrap_or_default();
        Err(UploadError::Other(format!("HTTP {}: {}", code, detail)))
      }
      Err(e) => Err(UploadError::Other(e.to_string())),
    }
  }

  /// 计算对象的请求地址、`Host` 与规范路径
  fn locate(&self, bucket: &str, key: &str) -> Result<(String, String, String), UploadError> {
    let encoded_key = key
      .split('/')
      .map(|segment| urlencoding::encode(segment).into_owned())
      .collect::<Vec<_>>()
      .join("/");

    match &self.endpoint {
      Some(endpoint) => {
        let host = endpoint
          .host_str()
          .ok_or_else(|| UploadError::Other(format!("端点缺少主机: {}", endpoint)))?;
        let host = match endpoint.port() {
          Some(port) => format!("{}:{}", host, port),
          None => host.to_string(),
        };
        let path = format!("/{}/{}", bucket, encoded_key);
        let url = format!("{}://{}{}", endpoint.scheme(), host, path);
        Ok((url, host, path))
      }
      None => {
        let host = format!("{}.s3.{}.amazonaws.com", bucket, self.region);
        let path = format!("/{}", encoded_key);
        let url = format!("https://{}{}", host, path);
        Ok((url, host, path))
      }
    }
  }

  fn sign_put(
    &self,
    credentials: &Credentials,
    bucket: &str,
    key: &str,
    payload_hash: &str,
    now: DateTime<Utc>,
  ) -> Result<SignedRequest, UploadError> {
    let (url, host, path) = self.locate(bucket, key)?;
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    // 规范头按名称排序
    let mut headers = vec![
      ("host".to_string(), host),
      ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
      ("x-amz-date".to_string(), amz_date.clone()),
    ];
    if let Some(token) = &credentials.session_token {
      headers.push(("x-amz-security-token".to_string(), token.clone()));
    }

    let canonical_headers = headers
      .iter()
      .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
      .collect::<String>();
    let signed_headers = headers
      .iter()
      .map(|(k, _)| k.as_str())
      .collect::<Vec<_>>()
      .join(";");
    let canonical_request = format!(
      "PUT\n{}\n\n{}\n{}\n{}",
      path, canonical_headers, signed_headers, payload_hash
    );

    let scope = format!("{}/{}/{}/aws4_request", date, self.region, SERVICE);
    let string_to_sign = format!(
      "AWS4-HMAC-SHA256\n{}\n{}\n{}",
      amz_date,
      scope,
      hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );
    let key = signing_key(&credentials.secret_access_key, &date, &self.region, SERVICE)?;
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

    let authorization = format!(
      "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
      credentials.access_key_id, scope, signed_headers, signature
    );

    // ureq 自己写 Host
    headers.retain(|(k, _)| k != "host");
    headers.push(("authorization".to_string(), authorization));
    Ok(SignedRequest { url, headers })
  }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, UploadError> {
  let mut mac = HmacSha256::new_from_slice(key)
    .map_err(|e| UploadError::Other(format!("HMAC 密钥无效: {}", e)))?;
  mac.update(data);
  Ok(mac.finalize().into_bytes().to_vec())
}

fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>, UploadError> {
  let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes())?;
  let k_region = hmac_sha256(&k_date, region.as_bytes())?;
  let k_service = hmac_sha256(&k_region, service.as_bytes())?;
  hmac_sha256(&k_service, b"aws4_request")
}

/// 上传文件，只报告成败
pub fn upload_file(local_path: impl AsRef<Path>, bucket: &str, remote_path: &str) -> bool {
  let local_path = local_path.as_ref();
  match ObjectStorage::from_env().upload(local_path, bucket, remote_path) {
    Ok(()) => true,
    Err(UploadError::FileNotFound(path)) => {
      error!("文件 {} 不存在", path.display());
      false
    }
    Err(UploadError::MissingCredentials) => {
      error!("未找到对象存储凭据");
      false
    }
    Err(e) => {
      error!("上传 {} 失败: {}", local_path.display(), e);
      false
    }
  }
}

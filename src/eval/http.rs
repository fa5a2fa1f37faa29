// 该文件是 Qiepian （切片检测） 项目的一部分。
// src/eval/http.rs - 通过 HTTP 请求检测服务
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

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::{
  FromUrl,
  eval::{EvalError, Instance, PredictionSource},
  geometry::Record,
};

#[derive(Serialize)]
struct PredictionRequest<'a> {
  instances: &'a [Instance],
}

#[derive(Deserialize)]
struct PredictionResponse {
  predictions: Vec<Vec<Record>>,
}

/// 向 `/cv` 端点 POST `{"instances": [...]}` 并读取 `{"predictions": [...]}`
pub struct HttpPredictor {
  client: Client,
  endpoint: Url,
}

impl FromUrl for HttpPredictor {
  type Error = EvalError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if !matches!(url.scheme(), "http" | "https") {
      return Err(EvalError::EndpointError(format!(
        "端点必须使用 http 或 https 方案: {}",
        url
      )));
    }

    // 默认不限制请求总时长
    Ok(HttpPredictor {
      client: Client::builder().timeout(None::<Duration>).build()?,
      endpoint: url.clone(),
    })
  }
}

impl HttpPredictor {
  pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, EvalError> {
    self.client = Client::builder().timeout(timeout).build()?;
    Ok(self)
  }

  pub fn endpoint(&self) -> &Url {
    &self.endpoint
  }
}

impl PredictionSource for HttpPredictor {
  fn predict_batch(&self, batch: &[Instance]) -> Result<Vec<Vec<Record>>, EvalError> {
    debug!("向 {} 发送 {} 个实例", self.endpoint, batch.len());
    let response: PredictionResponse = self
      .client
      .post(self.endpoint.clone())
      .json(&PredictionRequest { instances: batch })
      .send()?
      .error_for_status()?
      .json()?;
    Ok(response.predictions)
  }
}

#[cfg(test)]
mod tests {
  use std::io::{BufRead, BufReader, Read, Write};
  use std::net::TcpListener;
  use std::thread::{self, JoinHandle};

  use super::*;

  /// 在本机端口上应答一次请求，返回端点地址与收到的请求体
  fn serve_once(body: &'static str, delay: Duration) -> (Url, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = Url::parse(&format!("http://{}/cv", listener.local_addr().unwrap())).unwrap();

    let handle = thread::spawn(move || {
      let (mut stream, _) = listener.accept().unwrap();
      let mut reader = BufReader::new(stream.try_clone().unwrap());
      let mut content_length = 0usize;
      loop {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        if line.trim_end().is_empty() {
          break;
        }
        if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
          content_length = value.trim().parse().unwrap();
        }
      }
      let mut request = vec![0u8; content_length];
      reader.read_exact(&mut request).unwrap();

      thread::sleep(delay);
      // 客户端超时后连接已关闭，写入失败可忽略
      let _ = write!(
        stream,
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
      );
      String::from_utf8(request).unwrap()
    });

    (url, handle)
  }

  #[test]
  fn posts_batch_and_reads_predictions() {
    let (url, server) = serve_once(
      r#"{"predictions": [[{"bbox": [1, 2, 3, 4], "category_id": 7}], []]}"#,
      Duration::ZERO,
    );
    let predictor = HttpPredictor::from_url(&url).unwrap();
    let batch = vec![Instance::from_bytes(1, b"a"), Instance::from_bytes(2, b"b")];

    let preds = predictor.predict_batch(&batch).unwrap();
    assert_eq!(
      preds,
      vec![
        vec![Record {
          bbox: [1, 2, 3, 4],
          category_id: 7
        }],
        Vec::new()
      ]
    );

    let request: serde_json::Value = serde_json::from_str(&server.join().unwrap()).unwrap();
    assert_eq!(
      request,
      serde_json::json!({"instances": [{"key": 1, "b64": "YQ=="}, {"key": 2, "b64": "Yg=="}]})
    );
  }

  #[test]
  fn explicit_timeout_aborts_slow_service() {
    let (url, server) = serve_once(r#"{"predictions": [[]]}"#, Duration::from_millis(1500));
    let predictor = HttpPredictor::from_url(&url)
      .unwrap()
      .with_timeout(Duration::from_millis(200))
      .unwrap();

    let result = predictor.predict_batch(&[Instance::from_bytes(1, b"a")]);
    assert!(matches!(result, Err(EvalError::HttpError(e)) if e.is_timeout()));
    server.join().unwrap();
  }

  #[test]
  fn default_client_waits_for_slow_service() {
    let (url, server) = serve_once(r#"{"predictions": [[]]}"#, Duration::from_millis(1500));
    let predictor = HttpPredictor::from_url(&url).unwrap();

    let preds = predictor.predict_batch(&[Instance::from_bytes(1, b"a")]).unwrap();
    assert_eq!(preds, vec![Vec::<Record>::new()]);
    server.join().unwrap();
  }

  #[test]
  fn only_http_endpoints_are_accepted() {
    let ok = Url::parse("http://localhost:5002/cv").unwrap();
    assert_eq!(HttpPredictor::from_url(&ok).unwrap().endpoint(), &ok);

    let bad = Url::parse("ftp://localhost/cv").unwrap();
    assert!(matches!(
      HttpPredictor::from_url(&bad),
      Err(EvalError::EndpointError(_))
    ));
  }

  #[test]
  fn request_body_shape() {
    let instances = vec![Instance::from_bytes(1, b"x")];
    let body = serde_json::to_value(PredictionRequest {
      instances: &instances,
    })
    .unwrap();
    assert_eq!(
      body,
      serde_json::json!({"instances": [{"key": 1, "b64": "eA=="}]})
    );
  }

  #[test]
  fn response_body_shape() {
    let response: PredictionResponse = serde_json::from_str(
      r#"{"predictions": [[{"bbox": [1, 2, 3, 4], "category_id": 5}], []]}"#,
    )
    .unwrap();
    assert_eq!(response.predictions.len(), 2);
    assert_eq!(response.predictions[0][0].category_id, 5);
  }
}

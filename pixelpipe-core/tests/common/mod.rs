//! Helpers shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use pixelpipe_core::{
    Bitmap, DecodeResult, Decoder, DecoderFactory, Headers, ImageSource, NetworkClient,
    NetworkRequest, NetworkResponse, Options, PipelineError, PixelConfig, Result,
};
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Tue, 14 Nov 2023 22:13:20 GMT
pub const T0: i64 = 1_700_000_000_000;

pub fn http_date(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .unwrap()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

pub fn response(code: u16, headers: &[(&str, &str)], body: &[u8]) -> NetworkResponse {
    let headers: Headers = headers
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();
    NetworkResponse::new(code, headers, body.to_vec())
}

/// Answers requests from a queue of canned responses, recording each request
#[derive(Default)]
pub struct ScriptedClient {
    responses: Mutex<VecDeque<NetworkResponse>>,
    requests: Mutex<Vec<NetworkRequest>>,
    gate: Option<Semaphore>,
}

impl ScriptedClient {
    pub fn new(responses: Vec<NetworkResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Default::default()
        }
    }

    /// Every call blocks until [`release`](Self::release) hands out a permit
    pub fn gated(responses: Vec<NetworkResponse>) -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new(responses)
        }
    }

    pub fn release(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn request(&self, index: usize) -> NetworkRequest {
        self.requests.lock()[index].clone()
    }
}

#[async_trait]
impl NetworkClient for ScriptedClient {
    async fn execute(&self, request: NetworkRequest) -> Result<NetworkResponse> {
        self.requests.lock().push(request);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| PipelineError::Other(e.to_string()))?
                .forget();
        }
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| PipelineError::Other("no scripted response left".to_string()))
    }
}

/// Decodes any source into a single row of `Alpha8` pixels holding its bytes,
/// scaled up to the requested size when one is given
pub struct BytesDecoderFactory;

struct BytesDecoder;

impl DecoderFactory for BytesDecoderFactory {
    fn create(
        &self,
        _source: &ImageSource,
        _mime_type: Option<&str>,
        _options: &Options,
    ) -> Option<Box<dyn Decoder>> {
        Some(Box::new(BytesDecoder))
    }
}

#[async_trait]
impl Decoder for BytesDecoder {
    async fn decode(&self, source: ImageSource, options: &Options) -> Result<DecodeResult> {
        let bytes = source.read_bytes().await?;
        if options.size.is_original() {
            let image = Bitmap::from_pixels(bytes.len() as u32, 1, PixelConfig::Alpha8, bytes)
                .ok_or_else(|| PipelineError::Decode {
                    message: "empty body".to_string(),
                })?;
            return Ok(DecodeResult {
                image,
                is_sampled: false,
            });
        }

        let width = options.size.width.px_or(bytes.len() as u32);
        let height = options.size.height.px_or(1);
        Ok(DecodeResult {
            image: Bitmap::new(width, height, PixelConfig::Alpha8),
            is_sampled: false,
        })
    }
}

/// Poll `condition` until it holds, failing the test after a second
pub async fn until(condition: impl Fn() -> bool) {
    let wait = async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    };
    tokio::time::timeout(Duration::from_secs(1), wait)
        .await
        .expect("condition not reached");
}

/// Let every other ready task on a current-thread runtime run to its next
/// suspension point
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Route loader logs through the test harness; `RUST_LOG` picks the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

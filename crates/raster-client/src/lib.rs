//! HTTP client for the remote raster compute service.
//!
//! The service materializes serialized expression trees: `/v1/evaluate` takes
//! a batch of scalar expressions and returns one value (or null) per
//! expression in order; `/v1/thumbnail` renders a masked composite to PNG.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use detection_core::{
    DetectionError, Geometry, ImageExpr, RasterBackend, ScalarExpr, ThumbnailParams,
};

const DEFAULT_BASE_URL: &str = "http://localhost:9000";

#[derive(Serialize)]
struct EvaluateRequest<'a> {
    expressions: &'a [ScalarExpr],
}

#[derive(Deserialize)]
struct EvaluateResponse {
    values: Vec<Option<f64>>,
}

#[derive(Serialize)]
struct ThumbnailRequest<'a> {
    image: &'a ImageExpr,
    region: &'a Geometry,
    bands: &'a [String],
    min: f64,
    max: f64,
    dimensions: u32,
    format: &'a str,
}

#[derive(Clone)]
pub struct HttpRasterBackend {
    base_url: String,
    token: Option<String>,
    client: Client,
}

impl HttpRasterBackend {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        // Batched evaluations can reduce whole timelines server-side; give
        // them plenty of room before the client gives up.
        let client = Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url: base_url.into(),
            token,
            client,
        }
    }

    /// Configuration from `RASTER_BACKEND_URL` / `RASTER_BACKEND_TOKEN`.
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("RASTER_BACKEND_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let token = std::env::var("RASTER_BACKEND_TOKEN").ok();
        Self::new(base_url, token)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a request with automatic 429 retry.
    async fn send_request(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, DetectionError> {
        let request = builder
            .build()
            .map_err(|e| DetectionError::Backend(e.to_string()))?;

        for attempt in 0..3u32 {
            let req_clone = request
                .try_clone()
                .ok_or_else(|| DetectionError::Backend("Cannot clone request".to_string()))?;
            let response = self
                .client
                .execute(req_clone)
                .await
                .map_err(|e| DetectionError::Backend(e.to_string()))?;

            if response.status().as_u16() != 429 {
                return Ok(response);
            }

            let wait_secs = 15u64;
            tracing::warn!(
                "Raster backend 429 rate limited, waiting {}s before retry {}/3",
                wait_secs,
                attempt + 1
            );
            tokio::time::sleep(Duration::from_secs(wait_secs)).await;
        }

        Err(DetectionError::Backend(
            "Rate limited by raster backend after 3 retries".to_string(),
        ))
    }
}

#[async_trait]
impl RasterBackend for HttpRasterBackend {
    async fn evaluate(&self, exprs: &[ScalarExpr]) -> Result<Vec<Option<f64>>, DetectionError> {
        if exprs.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/v1/evaluate", self.base_url);
        tracing::debug!("Evaluating batch of {} expressions", exprs.len());

        let response = self
            .send_request(self.authorize(
                self.client.post(&url).json(&EvaluateRequest { expressions: exprs }),
            ))
            .await?;

        if !response.status().is_success() {
            return Err(DetectionError::Backend(format!(
                "HTTP {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        let body: EvaluateResponse = response
            .json()
            .await
            .map_err(|e| DetectionError::Backend(e.to_string()))?;

        if body.values.len() != exprs.len() {
            return Err(DetectionError::Backend(format!(
                "Evaluate returned {} values for {} expressions",
                body.values.len(),
                exprs.len()
            )));
        }

        Ok(body.values)
    }

    async fn render_thumbnail(
        &self,
        image: &ImageExpr,
        region: &Geometry,
        params: &ThumbnailParams,
    ) -> Result<Vec<u8>, DetectionError> {
        let url = format!("{}/v1/thumbnail", self.base_url);

        let response = self
            .send_request(self.authorize(self.client.post(&url).json(&ThumbnailRequest {
                image,
                region,
                bands: &params.bands,
                min: params.min,
                max: params.max,
                dimensions: params.dimensions,
                format: "png",
            })))
            .await
            .map_err(|e| DetectionError::Export(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DetectionError::Export(format!(
                "HTTP {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DetectionError::Export(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

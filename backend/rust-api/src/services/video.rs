//! Opaque video capability: "produce a video given a script". Rendering is
//! delegated to an external service; this side only generates the narration
//! script and records the resulting URL.

use async_trait::async_trait;
use serde_json::json;

use crate::config::Config;
use crate::error::CoreError;

/// Rendering can take minutes.
const RENDER_TIMEOUT_SECS: u64 = 600;

#[async_trait]
pub trait VideoRenderer: Send + Sync {
    /// Render a narrated video for one module and return its public URL.
    async fn render(
        &self,
        course_id: &str,
        module_index: u32,
        module_name: &str,
        script: &str,
    ) -> Result<String, CoreError>;
}

pub struct RemoteVideoRenderer {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteVideoRenderer {
    pub fn new(config: &Config) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(RENDER_TIMEOUT_SECS))
            .build()
            .map_err(|e| CoreError::UpstreamGeneration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.video_api_url.clone(),
        })
    }
}

#[async_trait]
impl VideoRenderer for RemoteVideoRenderer {
    async fn render(
        &self,
        course_id: &str,
        module_index: u32,
        module_name: &str,
        script: &str,
    ) -> Result<String, CoreError> {
        let url = format!("{}/v1/renders", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "course_id": course_id,
                "module_index": module_index,
                "module_name": module_name,
                "script": script,
            }))
            .send()
            .await
            .map_err(|e| CoreError::UpstreamGeneration(format!("render request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CoreError::UpstreamGeneration(format!(
                "render service returned {}: {}",
                status, detail
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CoreError::UpstreamGeneration(format!("invalid render response: {}", e)))?;

        body.get("video_url")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .ok_or_else(|| {
                CoreError::UpstreamGeneration("render response carries no video_url".to_string())
            })
    }
}

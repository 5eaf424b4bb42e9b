//! HTTP transport for merchant payment callbacks

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use tracing::debug;

use crate::config::CallbackConfig;
use crate::domain::ports::CallbackSender;
use crate::shared::error::{AppError, AppResult};

/// reqwest implementation of [`CallbackSender`]
#[derive(Clone)]
pub struct HttpCallbackSender {
    client: Client,
    user_agent: String,
}

impl HttpCallbackSender {
    pub fn new(config: &CallbackConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
        })
    }
}

#[async_trait]
impl CallbackSender for HttpCallbackSender {
    async fn post_json(&self, url: &str, body: &serde_json::Value) -> AppResult<u16> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, &self.user_agent)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::CallbackDeliveryFailed(format!("POST {} failed: {}", url, e)))?;

        let status = response.status().as_u16();
        debug!(url = %url, status, "Callback answered");
        Ok(status)
    }
}

//! HTTP deploy hook (Vercel/Netlify style build trigger).

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};
use url::Url;

use crate::application::repos::{DeployError, DeployHook};
use crate::config::DeploySettings;

use super::error::InfraError;
use super::user_agent;

const SOURCE: &str = "infra::deploy_hook";

#[derive(Debug, Clone)]
pub struct HttpDeployHook {
    client: Client,
    url: Option<Url>,
}

impl HttpDeployHook {
    pub fn new(settings: &DeploySettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(user_agent())
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| InfraError::configuration(format!("http client: {err}")))?;
        Ok(Self {
            client,
            url: settings.hook_url.clone(),
        })
    }
}

#[async_trait]
impl DeployHook for HttpDeployHook {
    async fn trigger(&self) -> Result<(), DeployError> {
        let url = self.url.clone().ok_or(DeployError::NotConfigured)?;
        let response = self
            .client
            .post(url)
            .send()
            .await
            .map_err(DeployError::unavailable)?;

        let status = response.status();
        debug!(target = SOURCE, %status, "Deploy hook responded");
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(target = SOURCE, %status, body = %body, "Deploy hook rejected the request");
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(DeployError::AuthFailure(format!("status {status}")))
            }
            _ => Err(DeployError::unavailable(format!("status {status}"))),
        }
    }
}

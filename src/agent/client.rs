use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::telemetry::{SystemInfo, TelemetrySample, TelemetrySimulator};
use super::{AgentConfig, AgentError, AGENT_VERSION, REGISTER_RETRY_INTERVAL, REQUEST_TIMEOUT};

#[derive(Serialize)]
struct RegisterPayload<'a> {
    drone_id: &'a str,
    agent_version: &'a str,
    mode: &'a str,
    system: SystemInfo,
}

#[derive(Serialize)]
struct TelemetryPayload<'a> {
    drone_id: &'a str,
    #[serde(flatten)]
    sample: &'a TelemetrySample,
}

/// HTTP client for the fleet backend, one session id per process.
pub struct AgentClient {
    http: reqwest::Client,
    config: AgentConfig,
    session_id: Uuid,
    retry_interval: Duration,
}

impl AgentClient {
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        let session_id = Uuid::new_v4();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static("x-agent-session"),
            HeaderValue::from_str(&session_id.to_string())
                .map_err(|e| AgentError::Config(e.to_string()))?,
        );

        let http = reqwest::Client::builder()
            .user_agent(format!("DRONEX-Agent/{AGENT_VERSION}"))
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            config,
            session_id,
            retry_interval: REGISTER_RETRY_INTERVAL,
        })
    }

    /// Override the pause between registration attempts.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<(), AgentError> {
        let response = self
            .http
            .post(format!("{}{}", self.config.url, path))
            .bearer_auth(&self.config.token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(AgentError::Rejected {
            status: status.as_u16(),
            body: body.trim().to_string(),
        })
    }

    /// Single registration attempt.
    pub async fn try_register(&self) -> Result<(), AgentError> {
        let payload = RegisterPayload {
            drone_id: &self.config.drone_id,
            agent_version: AGENT_VERSION,
            mode: self.config.mode.as_str(),
            system: SystemInfo::collect(),
        };
        self.post("/api/agent/register/", &payload).await
    }

    /// Register, retrying at a fixed interval until the backend accepts.
    pub async fn register(&self) {
        loop {
            match self.try_register().await {
                Ok(()) => {
                    info!("Registered with fleet backend");
                    return;
                }
                Err(e @ AgentError::Rejected { .. }) => error!("Registration failed: {}", e),
                Err(e) => warn!("Network error while registering: {}", e),
            }

            info!("Retrying registration in {:?}", self.retry_interval);
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    pub async fn send_telemetry(&self, sample: &TelemetrySample) -> Result<(), AgentError> {
        let payload = TelemetryPayload {
            drone_id: &self.config.drone_id,
            sample,
        };
        self.post("/api/agent/telemetry/", &payload).await
    }

    /// Post simulated telemetry every interval, forever.
    pub async fn telemetry_loop(&self, mut simulator: TelemetrySimulator) {
        loop {
            let sample = simulator.next_sample();
            match self.send_telemetry(&sample).await {
                Ok(()) => info!("Telemetry sent (battery {:.2}%)", sample.battery),
                Err(e @ AgentError::Rejected { .. }) => error!("Telemetry failed: {}", e),
                Err(e) => warn!("Network error while sending telemetry: {}", e),
            }
            tokio::time::sleep(self.config.telemetry_interval).await;
        }
    }
}

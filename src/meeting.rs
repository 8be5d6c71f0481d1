//! External meeting provider interface
//!
//! The provider is an external collaborator; its failures are surfaced as
//! catchable [`MarketError::MeetingProvider`] errors and never abort a
//! booking transition. Scheduling proceeds with an empty link when the
//! provider is down, and a later start call retries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::MarketError;

/// Reference to an externally provisioned meeting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingInfo {
    pub meeting_id: String,
    pub join_url: String,
}

/// Provider-reported meeting state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeetingState {
    Waiting,
    Started,
    Finished,
    Unknown,
}

impl MeetingState {
    fn parse(raw: &str) -> Self {
        match raw {
            "waiting" => MeetingState::Waiting,
            "started" => MeetingState::Started,
            "finished" => MeetingState::Finished,
            _ => MeetingState::Unknown,
        }
    }
}

/// Video-meeting provisioning, implemented over the provider's HTTP API
#[async_trait]
pub trait MeetingProvider: Send + Sync {
    /// Provision a meeting room and return its id and join link
    async fn create_meeting(
        &self,
        topic: &str,
        duration_minutes: u32,
    ) -> Result<MeetingInfo, MarketError>;

    /// Query the current state of a meeting
    async fn meeting_status(&self, meeting_id: &str) -> Result<MeetingState, MarketError>;
}

/// HTTP client for the meeting provider API
pub struct HttpMeetingProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct CreateMeetingRequest<'a> {
    topic: &'a str,
    duration_minutes: u32,
}

#[derive(Deserialize)]
struct CreateMeetingResponse {
    id: String,
    join_url: String,
}

#[derive(Deserialize)]
struct MeetingStatusResponse {
    status: String,
}

impl HttpMeetingProvider {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MeetingProvider for HttpMeetingProvider {
    async fn create_meeting(
        &self,
        topic: &str,
        duration_minutes: u32,
    ) -> Result<MeetingInfo, MarketError> {
        let url = format!("{}/meetings", self.base_url);
        debug!(topic = %topic, "Creating meeting");

        let response = self
            .client
            .post(&url)
            .json(&CreateMeetingRequest {
                topic,
                duration_minutes,
            })
            .send()
            .await
            .map_err(|e| MarketError::MeetingProvider(format!("create request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| MarketError::MeetingProvider(format!("create rejected: {}", e)))?;

        let body: CreateMeetingResponse = response
            .json()
            .await
            .map_err(|e| MarketError::MeetingProvider(format!("bad create response: {}", e)))?;

        Ok(MeetingInfo {
            meeting_id: body.id,
            join_url: body.join_url,
        })
    }

    async fn meeting_status(&self, meeting_id: &str) -> Result<MeetingState, MarketError> {
        let url = format!("{}/meetings/{}", self.base_url, meeting_id);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MarketError::MeetingProvider(format!("status request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| MarketError::MeetingProvider(format!("status rejected: {}", e)))?;

        let body: MeetingStatusResponse = response
            .json()
            .await
            .map_err(|e| MarketError::MeetingProvider(format!("bad status response: {}", e)))?;

        Ok(MeetingState::parse(&body.status))
    }
}

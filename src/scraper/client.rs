//! Blocking HTTP client for the PMU programme API

use chrono::NaiveDate;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::payload::{MeetingPayload, ParticipantsPayload};
use super::{participants_url, programme_url};
use crate::config::ApiConfig;

/// Scraper errors
#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// What an upstream resource answered
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<T> {
    /// 200 with a decoded payload
    Content(T),
    /// 204: the resource does not exist
    NoContent,
    /// Any other status code
    Unexpected(u16),
}

/// Source of meeting programmes and participant lists
pub trait ProgrammeSource {
    fn fetch_meeting(
        &self,
        date: NaiveDate,
        meeting: u32,
    ) -> Result<FetchOutcome<MeetingPayload>, ScraperError>;

    fn fetch_participants(
        &self,
        date: NaiveDate,
        meeting: u32,
        race: u32,
    ) -> Result<FetchOutcome<ParticipantsPayload>, ScraperError>;
}

/// PMU programme API client
pub struct PmuClient {
    client: Client,
    base_url: String,
}

impl PmuClient {
    /// Create a client from the API configuration
    pub fn new(config: &ApiConfig) -> Result<Self, ScraperError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<FetchOutcome<T>, ScraperError> {
        debug!("GET {}", url);
        let response = self.client.get(url).send()?;

        match response.status() {
            StatusCode::OK => {
                let body = response.text()?;
                let payload = serde_json::from_str(&body).map_err(|source| ScraperError::Decode {
                    url: url.to_string(),
                    source,
                })?;
                Ok(FetchOutcome::Content(payload))
            }
            StatusCode::NO_CONTENT => Ok(FetchOutcome::NoContent),
            other => Ok(FetchOutcome::Unexpected(other.as_u16())),
        }
    }
}

impl ProgrammeSource for PmuClient {
    fn fetch_meeting(
        &self,
        date: NaiveDate,
        meeting: u32,
    ) -> Result<FetchOutcome<MeetingPayload>, ScraperError> {
        self.get_json(&programme_url(&self.base_url, date, meeting))
    }

    fn fetch_participants(
        &self,
        date: NaiveDate,
        meeting: u32,
        race: u32,
    ) -> Result<FetchOutcome<ParticipantsPayload>, ScraperError> {
        self.get_json(&participants_url(&self.base_url, date, meeting, race))
    }
}

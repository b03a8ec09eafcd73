//! HTTP client for the companion device

use std::time::Duration;

use url::Url;

use super::types::{
    Ack, CheckReadResponse, HealthResponse, LatestCardResponse, SpeakRequest, StartReadRequest,
};
use crate::config::CompanionConfig;
use crate::{Error, Result};

/// Outcome of one reader status check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollReply {
    /// The companion answered with a status body
    Status(CheckReadResponse),
    /// The check failed in a way worth retrying (non-success status, request timeout)
    Transient(String),
}

/// Talks to the companion device's health, speech and card reader endpoints
#[derive(Debug, Clone)]
pub struct CompanionClient {
    http: reqwest::Client,
    base: Url,
    proximity_base: Url,
    probe_timeout: Duration,
}

impl CompanionClient {
    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns error if a base URL is invalid or the HTTP client cannot be built
    pub fn new(config: &CompanionConfig) -> Result<Self> {
        let base = parse_base(&config.url)?;
        let proximity_base = match &config.proximity_url {
            Some(url) => parse_base(url)?,
            None => base.clone(),
        };

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            base,
            proximity_base,
            probe_timeout: config.probe_timeout,
        })
    }

    /// Create a client for a single base URL with default timeouts
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid
    pub fn from_url(url: &str) -> Result<Self> {
        Self::new(&CompanionConfig {
            url: url.to_string(),
            proximity_url: None,
            probe_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(5),
        })
    }

    /// Base URL of the companion
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base
    }

    /// Upper bound applied to health checks
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// WebSocket URL of the streaming recognizer (`/stt/stream`)
    ///
    /// # Errors
    ///
    /// Returns error if the base URL has no WebSocket equivalent
    pub fn stream_url(&self) -> Result<Url> {
        let mut url = endpoint(&self.base, "stt/stream")?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(Error::Config(format!(
                    "unsupported companion scheme: {other}"
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| Error::Config(format!("cannot derive stream URL from {}", self.base)))?;
        Ok(url)
    }

    /// Check companion liveness, bounded by the probe timeout
    ///
    /// # Errors
    ///
    /// Returns `ProbeTimeout` if no answer arrives in time, or an HTTP/decoding
    /// error if the companion answers badly
    pub async fn health(&self) -> Result<HealthResponse> {
        let url = endpoint(&self.base, "health")?;
        let request = async {
            let response = self
                .http
                .get(url)
                .timeout(self.probe_timeout)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(Error::RemoteRejected(format!("health check returned {status}")));
            }

            Ok(response.json::<HealthResponse>().await?)
        };

        tokio::time::timeout(self.probe_timeout, request)
            .await
            .map_err(|_| Error::ProbeTimeout(self.probe_timeout))?
    }

    /// Ask the companion to speak `text`
    ///
    /// # Errors
    ///
    /// Returns `Tts` if the companion answers with a non-success status or
    /// reports `status != "ok"`
    pub async fn speak(&self, text: &str) -> Result<Ack> {
        let url = endpoint(&self.base, "speak")?;
        let response = self
            .http
            .post(url)
            .json(&SpeakRequest {
                text: text.to_string(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("companion speak error {status}: {body}")));
        }

        let ack: Ack = response.json().await?;
        if ack.status != "ok" {
            return Err(Error::Tts(format!(
                "companion speak failed: {}",
                ack.message.as_deref().unwrap_or("no message")
            )));
        }

        tracing::debug!(message = ?ack.message, "companion speech started");
        Ok(ack)
    }

    /// Begin a card read on the companion's reader
    ///
    /// # Errors
    ///
    /// Returns `ReadError` if the companion refuses (e.g. a read is already running)
    pub async fn start_read(&self, timeout_secs: u32) -> Result<()> {
        let url = endpoint(&self.proximity_base, "start-nfc")?;
        let response = self
            .http
            .post(url)
            .json(&StartReadRequest {
                timeout: timeout_secs,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ReadError(format!("start-nfc returned {status}: {body}")));
        }

        Ok(())
    }

    /// Check the reader status once
    ///
    /// Non-success statuses and request timeouts come back as
    /// [`PollReply::Transient`]; connection failures and undecodable bodies are errors.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure or malformed response
    pub async fn check_read(&self) -> Result<PollReply> {
        let url = endpoint(&self.proximity_base, "check-nfc")?;
        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Ok(PollReply::Transient(e.to_string())),
            Err(e) => return Err(e.into()),
        };

        let status = response.status();
        if !status.is_success() {
            return Ok(PollReply::Transient(format!("check-nfc returned {status}")));
        }

        let body: CheckReadResponse = response.json().await?;
        Ok(PollReply::Status(body))
    }

    /// Card read within the companion's freshness window, if any (`GET /read-nfc`)
    ///
    /// # Errors
    ///
    /// Returns error on transport failure or non-success status
    pub async fn latest_card(&self) -> Result<Option<String>> {
        let url = endpoint(&self.proximity_base, "read-nfc")?;
        let response = self.http.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ReadError(format!("read-nfc returned {status}")));
        }

        let body: LatestCardResponse = response.json().await?;
        Ok(if body.status == "ok" { body.idm } else { None })
    }
}

/// Parse a base URL, making sure relative joins append rather than replace
fn parse_base(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)
        .map_err(|e| Error::Config(format!("invalid companion URL {raw:?}: {e}")))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn endpoint(base: &Url, path: &str) -> Result<Url> {
    base.join(path)
        .map_err(|e| Error::Config(format!("invalid endpoint {path}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_url_scheme() {
        let client = CompanionClient::from_url("http://raspberrypi.local:8000").unwrap();
        assert_eq!(
            client.stream_url().unwrap().as_str(),
            "ws://raspberrypi.local:8000/stt/stream"
        );

        let secure = CompanionClient::from_url("https://kiosk.example/companion").unwrap();
        assert_eq!(
            secure.stream_url().unwrap().as_str(),
            "wss://kiosk.example/companion/stt/stream"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let base = parse_base("http://host:8000/api").unwrap();
        assert_eq!(
            endpoint(&base, "check-nfc").unwrap().as_str(),
            "http://host:8000/api/check-nfc"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            CompanionClient::from_url("not a url"),
            Err(Error::Config(_))
        ));
    }
}

//! HTTP side channel used before the chat transport opens
//!
//! Two lookups per handshake attempt: a login challenge and the list of live
//! chat relays.

use async_trait::async_trait;
use rand::seq::IteratorRandom;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use super::config::ChatConfig;
use crate::error::{Error, Result};

/// Challenge triple answered in the handshake
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Challenge {
    #[serde(alias = "Time")]
    pub time: i64,
    #[serde(alias = "Cid")]
    pub cid: String,
    #[serde(alias = "Key")]
    pub key: String,
}

#[derive(Deserialize)]
struct ChallengeResponse {
    #[serde(alias = "Result")]
    result: Challenge,
}

#[derive(Deserialize)]
struct ServerConfigResponse {
    #[serde(default, alias = "Websocket_Servers")]
    websocket_servers: HashMap<String, serde_json::Value>,
}

/// Source of challenge triples and relay hosts
#[async_trait]
pub trait Bootstrap: Send + Sync {
    async fn fetch_challenge(&self) -> Result<Challenge>;

    /// Name of one live chat relay
    async fn fetch_relay_host(&self) -> Result<String>;
}

/// Parse the challenge endpoint's JSON body
pub fn parse_challenge(body: &str) -> Result<Challenge> {
    let response: ChallengeResponse = serde_json::from_str(body)
        .map_err(|e| Error::Connect(format!("bad challenge response: {}", e)))?;
    Ok(response.result)
}

/// Pick a random relay from the server list body
pub fn pick_relay_host(body: &str) -> Result<String> {
    let config: ServerConfigResponse = serde_json::from_str(body)
        .map_err(|e| Error::Connect(format!("bad server config: {}", e)))?;

    config
        .websocket_servers
        .into_keys()
        .choose(&mut rand::thread_rng())
        .ok_or_else(|| Error::Connect("no websocket servers".into()))
}

/// `Bootstrap` over HTTPS
pub struct HttpBootstrap {
    client: reqwest::Client,
    config: ChatConfig,
}

impl HttpBootstrap {
    pub fn new(config: ChatConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Bootstrap for HttpBootstrap {
    async fn fetch_challenge(&self) -> Result<Challenge> {
        let nc: f64 = rand::random();
        let url = format!(
            "{}?nc={:.16}&site={}",
            self.config.challenge_url, nc, self.config.site
        );
        tracing::debug!(url = %url, "Fetching login challenge");

        let body = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_challenge(&body)
    }

    async fn fetch_relay_host(&self) -> Result<String> {
        let body = self
            .client
            .get(&self.config.server_config_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let host = pick_relay_host(&body)?;
        tracing::debug!(host = %host, "Picked chat relay");
        Ok(host)
    }
}

//! Blocking client for an Ollama-compatible `/api/generate` endpoint.

use std::io::Read;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{AdvisoryBackend, AdvisoryError};
use crate::config::AdvisoryConfig;

/// Replies larger than this are not model opinions.
const MAX_RESPONSE_BYTES: usize = 1_000_000;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_ctx: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

pub struct OllamaBackend {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
    num_ctx: u32,
    temperature: f32,
}

impl std::fmt::Debug for OllamaBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaBackend")
            .field("url", &self.url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl OllamaBackend {
    pub fn new(config: &AdvisoryConfig) -> Result<Self, AdvisoryError> {
        let client = reqwest::blocking::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("stig-gate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AdvisoryError::Client(e.to_string()))?;
        Ok(Self {
            client,
            url: format!("{}/api/generate", config.endpoint.trim_end_matches('/')),
            model: config.model.clone(),
            num_ctx: config.num_ctx,
            temperature: config.temperature,
        })
    }

    fn request<'a>(&'a self, prompt: &'a str) -> GenerateRequest<'a> {
        GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
                num_ctx: self.num_ctx,
            },
        }
    }
}

impl AdvisoryBackend for OllamaBackend {
    fn generate(&self, prompt: &str) -> Result<String, AdvisoryError> {
        log::debug!("POST {} (model {}, {} prompt chars)", self.url, self.model, prompt.len());
        let resp = self
            .client
            .post(&self.url)
            .json(&self.request(prompt))
            .send()
            .map_err(|e| AdvisoryError::Transport {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        let mut raw = Vec::new();
        resp.take(MAX_RESPONSE_BYTES as u64 + 1)
            .read_to_end(&mut raw)
            .map_err(|e| AdvisoryError::Transport {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;
        if raw.len() > MAX_RESPONSE_BYTES {
            return Err(AdvisoryError::Envelope(format!(
                "reply exceeds {MAX_RESPONSE_BYTES} bytes"
            )));
        }
        let body = String::from_utf8_lossy(&raw);
        if !status.is_success() {
            return Err(AdvisoryError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let reply: GenerateResponse =
            serde_json::from_str(&body).map_err(|e| AdvisoryError::Envelope(e.to_string()))?;
        Ok(reply.response)
    }
}

//! Blocking HTTP client for a running `fraktal serve`.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use fraktal_core::Settings;

use crate::Paths;

/// Connection overrides shared by every client command.
#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Service base URL (default: http://<bind> from settings).
    #[arg(long, value_name = "URL")]
    pub url: Option<String>,

    /// Bearer token (default: api_token from settings / FRAKTAL_API_TOKEN).
    #[arg(long, value_name = "TOKEN")]
    pub token: Option<String>,
}

/// A non-2xx answer from the service.
#[derive(Debug)]
pub struct ApiFailure {
    pub status: u16,
    pub body: Value,
}

impl std::fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = self.body["error"].as_str().unwrap_or("error");
        match self.body["message"].as_str() {
            Some(message) => write!(f, "HTTP {} {kind}: {message}", self.status),
            None => write!(f, "HTTP {} {kind}", self.status),
        }
    }
}

impl std::error::Error for ApiFailure {}

pub struct ApiClient {
    agent: ureq::Agent,
    base: String,
    token: String,
}

impl ApiClient {
    pub fn new(args: &ClientArgs, paths: &Paths) -> Result<Self> {
        let settings = Settings::load_at(&paths.settings_path).with_context(|| {
            format!("failed to load settings from {}", paths.settings_path.display())
        })?;
        let base = args
            .url
            .clone()
            .unwrap_or_else(|| format!("http://{}", settings.bind));
        let token = args.token.clone().unwrap_or(settings.api_token);
        Ok(ApiClient {
            // Creates wait on room and gateway calls; leave them room to finish.
            agent: ureq::AgentBuilder::new()
                .timeout_connect(Duration::from_secs(5))
                .timeout(Duration::from_secs(120))
                .build(),
            base: base.trim_end_matches('/').to_owned(),
            token,
        })
    }

    pub fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let (_, body) = self.send(self.request("GET", path).call())?;
        decode(body)
    }

    pub fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let (_, body) = self.send(self.request("POST", path).send_json(body))?;
        decode(body)
    }

    /// Returns the status too: 200 and 202 mean different things.
    pub fn delete(&self, path: &str) -> Result<(u16, Value)> {
        self.send(self.request("DELETE", path).call())
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        let request = self.agent.request(method, &format!("{}{path}", self.base));
        if self.token.is_empty() {
            request
        } else {
            request.set("Authorization", &format!("Bearer {}", self.token))
        }
    }

    fn send(&self, result: Result<ureq::Response, ureq::Error>) -> Result<(u16, Value)> {
        match result {
            Ok(response) => {
                let status = response.status();
                let body = response
                    .into_json::<Value>()
                    .context("service returned a body that is not JSON")?;
                Ok((status, body))
            }
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_json::<Value>().unwrap_or(Value::Null);
                Err(ApiFailure { status, body }.into())
            }
            Err(ureq::Error::Transport(err)) => {
                Err(anyhow!("could not reach fraktal service at {}: {err}", self.base))
            }
        }
    }
}

fn decode<T: DeserializeOwned>(body: Value) -> Result<T> {
    serde_json::from_value(body).context("unexpected response shape from service")
}

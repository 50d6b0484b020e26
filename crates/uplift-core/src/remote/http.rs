//! Blocking HTTP client shared by the network strategies.

use std::io::Read;
use std::time::Duration;

use serde::de::DeserializeOwned;
use uplift_config::SourceConfig;

use super::RemoteError;

/// Upper bound on a single response body.
pub const MAX_BODY_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
}

impl HttpClient {
    pub fn new(source: &SourceConfig) -> Self {
        let timeout = Duration::from_secs(source.timeout_secs.max(1));
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .user_agent(&source.user_agent)
            .build();
        Self { agent }
    }

    fn call(&self, url: &str, accept: &str) -> Result<Option<ureq::Response>, RemoteError> {
        match self.agent.get(url).set("Accept", accept).call() {
            Ok(resp) => Ok(Some(resp)),
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(ureq::Error::Status(status, _)) => Err(RemoteError::Http {
                url: url.to_string(),
                status,
            }),
            Err(ureq::Error::Transport(t)) => Err(RemoteError::Transport {
                url: url.to_string(),
                message: t.to_string(),
            }),
        }
    }

    /// GET a body. `Ok(None)` on 404.
    pub fn get_bytes(&self, url: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        let Some(resp) = self.call(url, "application/octet-stream")? else {
            return Ok(None);
        };
        let mut buf = Vec::new();
        resp.into_reader()
            .take(MAX_BODY_BYTES + 1)
            .read_to_end(&mut buf)
            .map_err(|e| RemoteError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        if buf.len() as u64 > MAX_BODY_BYTES {
            return Err(RemoteError::Protocol(format!(
                "response from {} exceeds {} bytes",
                url, MAX_BODY_BYTES
            )));
        }
        Ok(Some(buf))
    }

    /// GET a UTF-8 body. `Ok(None)` on 404.
    pub fn get_text(&self, url: &str) -> Result<Option<String>, RemoteError> {
        match self.get_bytes(url)? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| RemoteError::Protocol(format!("{} is not UTF-8", url))),
            None => Ok(None),
        }
    }

    /// GET a GitHub API document. 404 is an error here.
    pub fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, RemoteError> {
        let resp = self
            .call(url, "application/vnd.github+json")?
            .ok_or_else(|| RemoteError::Http {
                url: url.to_string(),
                status: 404,
            })?;
        resp.into_json::<T>()
            .map_err(|e| RemoteError::Protocol(format!("invalid JSON from {}: {}", url, e)))
    }
}

/// Join URL segments with single slashes, skipping empty ones.
pub fn join_url(base: &str, segments: &[&str]) -> String {
    let mut url = base.trim_end_matches('/').to_string();
    for segment in segments {
        let segment = segment.trim_matches('/');
        if segment.is_empty() {
            continue;
        }
        url.push('/');
        url.push_str(segment);
    }
    url
}

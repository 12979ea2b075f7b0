// Digest-authenticating HTTP client
//
// Wraps `reqwest::Client` with the GET/POST JSON convention the amplifier
// units speak, re-issuing a challenged request exactly once with a
// fully-formed Authorization header. A second 401 is surfaced as a final
// authentication failure -- never an infinite re-challenge loop.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use crate::error::Error;
use crate::http::digest;

/// Default request timeout. Discovery probes hundreds of hosts, so each
/// one has to fail fast.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1200);

/// Status plus optionally-parsed JSON body.
///
/// Embedded servers answer error paths with empty or non-JSON bodies, so
/// the body is best-effort: callers branch on `status` first.
#[derive(Debug)]
pub struct HttpResponse<T> {
    pub status: StatusCode,
    pub data: Option<T>,
}

impl<T> HttpResponse<T> {
    pub fn ok(&self) -> bool {
        self.status == StatusCode::OK
    }
}

pub struct DigestClient {
    http: reqwest::Client,
    host: String,
    credentials: Option<(String, SecretString)>,
    nonce_count: AtomicU32,
}

impl DigestClient {
    /// Create a client for one unit. `host` is `ip` or `ip:port`.
    pub fn new(
        host: impl Into<String>,
        credentials: Option<(String, SecretString)>,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::Transport)?;
        Ok(Self {
            http,
            host: host.into(),
            credentials,
            nonce_count: AtomicU32::new(0),
        })
    }

    /// The unit this client talks to.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<HttpResponse<T>, Error> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<HttpResponse<T>, Error> {
        let body = serde_json::to_value(body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: String::new(),
        })?;
        self.request(Method::POST, path, Some(body)).await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<HttpResponse<T>, Error> {
        let resp = self.send(method.clone(), path, body.as_ref(), None).await?;

        if resp.status() != StatusCode::UNAUTHORIZED {
            return parse(resp).await;
        }

        let Some((username, password)) = &self.credentials else {
            return parse(resp).await;
        };
        let Some(challenge) = resp
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(digest::parse_challenge)
        else {
            return parse(resp).await;
        };

        debug!(host = %self.host, path, "answering digest challenge");
        let cnonce = Uuid::new_v4().simple().to_string();
        let nc = self.nonce_count.fetch_add(1, Ordering::Relaxed) + 1;
        let auth = digest::authorization_header(
            username,
            password.expose_secret(),
            method.as_str(),
            path,
            &challenge,
            &cnonce,
            nc,
        );

        let retry = self.send(method, path, body.as_ref(), Some(&auth)).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication {
                message: format!("digest credentials rejected by {}", self.host),
            });
        }
        parse(retry).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        auth: Option<&str>,
    ) -> Result<reqwest::Response, Error> {
        let url = format!("http://{}{}", self.host, path);
        let mut req = self.http.request(method, &url);
        if let Some(body) = body {
            req = req.json(body);
        }
        if let Some(auth) = auth {
            req = req.header(AUTHORIZATION, auth);
        }
        req.send().await.map_err(Error::Transport)
    }
}

async fn parse<T: DeserializeOwned>(resp: reqwest::Response) -> Result<HttpResponse<T>, Error> {
    let status = resp.status();
    let text = resp.text().await.map_err(Error::Transport)?;
    let data = if text.is_empty() {
        None
    } else {
        serde_json::from_str(&text).ok()
    };
    Ok(HttpResponse { status, data })
}

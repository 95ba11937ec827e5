//! HTTP transport to the NSX-T manager.
//!
//! One [`NsxtClient`] wraps one `reqwest::Client` plus the authentication
//! material for a single manager. The client is immutable after
//! [`NsxtClient::connect`]; cloning it shares the underlying connection
//! pool.

use reqwest::header::{HeaderMap, HeaderValue, COOKIE, SET_COOKIE};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{AuthType, ClientConfig};
use crate::error::{Error, Result};

const SESSION_CREATE_PATH: &str = "/api/session/create";
const XSRF_TOKEN_HEADER: &str = "X-XSRF-TOKEN";

/// Authenticated HTTP client for one NSX-T manager.
#[derive(Debug, Clone)]
pub struct NsxtClient {
    http: reqwest::Client,
    base_url: String,
    /// Credentials attached per call in basic mode. Session mode pins the
    /// cookie and CSRF token as default headers instead.
    basic: Option<(String, String)>,
}

impl NsxtClient {
    /// Connect to the manager described by `config`.
    ///
    /// In session mode this performs the login call immediately so that
    /// every later request carries the session cookie and CSRF token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] when the session login is rejected and
    /// [`Error::Transport`] when the manager is unreachable.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        Self::connect_to(config.base_url(), config).await
    }

    /// Connect using an explicit base URL instead of the one derived from
    /// `config`. Lifecycle code uses [`NsxtClient::connect`]; this exists
    /// for tests that point the client at a local mock manager.
    pub async fn connect_to(base_url: impl Into<String>, config: &ClientConfig) -> Result<Self> {
        let base_url = base_url.into();
        config.validate()?;

        match config.auth_type {
            AuthType::Basic => {
                debug!("API calls use basic authentication");
                let http = builder(config).build()?;
                Ok(Self {
                    http,
                    base_url,
                    basic: Some((config.username.clone(), config.password.clone())),
                })
            }
            AuthType::Session => {
                debug!("API calls use session authentication");
                let headers = create_session(&base_url, config).await?;
                let http = builder(config).default_headers(headers).build()?;
                Ok(Self {
                    http,
                    base_url,
                    basic: None,
                })
            }
        }
    }

    /// Issue exactly one HTTP round trip against the manager.
    ///
    /// `Ok(None)` means the manager answered with success and an empty
    /// body (PATCH and DELETE usually do).
    pub(crate) async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Option<Value>> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "sending NSX-T API request");

        let mut request = self.http.request(method.clone(), &url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some((username, password)) = &self.basic {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await?;
        let status = response.status();
        debug!(%method, %url, %status, "NSX-T API response received");

        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound {
                resource: format!("{method} {path}"),
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&text)?))
    }
}

fn builder(config: &ClientConfig) -> reqwest::ClientBuilder {
    reqwest::Client::builder().danger_accept_invalid_certs(config.insecure)
}

/// Exchange credentials for a session cookie and CSRF token.
async fn create_session(base_url: &str, config: &ClientConfig) -> Result<HeaderMap> {
    debug!("preparing session authentication");
    let bootstrap = builder(config).build()?;
    let response = bootstrap
        .post(format!("{base_url}{SESSION_CREATE_PATH}"))
        .form(&[
            ("j_username", config.username.as_str()),
            ("j_password", config.password.as_str()),
        ])
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(Error::Auth {
            status: status.as_u16(),
            message,
        });
    }

    let mut headers = HeaderMap::new();
    let cookie = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .collect::<Vec<_>>()
        .join("; ");
    if cookie.is_empty() {
        return Err(Error::Auth {
            status: status.as_u16(),
            message: "session login returned no session cookie".into(),
        });
    }
    headers.insert(
        COOKIE,
        HeaderValue::from_str(&cookie)
            .map_err(|e| Error::Auth {
                status: status.as_u16(),
                message: format!("invalid session cookie: {e}"),
            })?,
    );

    match response.headers().get(XSRF_TOKEN_HEADER) {
        Some(token) => {
            headers.insert(XSRF_TOKEN_HEADER, token.clone());
        }
        None => warn!("session login returned no {XSRF_TOKEN_HEADER} header"),
    }

    debug!("session cookie and {XSRF_TOKEN_HEADER} are set");
    Ok(headers)
}

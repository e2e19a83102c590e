//! Permission-gated outbound HTTP for agent code.
//!
//! Agent code never opens sockets itself. Every `fetch` it makes arrives here as
//! a capability request and is checked against the package's
//! [`PermissionGrant`] before (and across redirects during) the request.

use std::collections::BTreeMap;
use std::time::Duration;

use agentpack_core::observability;
use agentpack_core::permissions::{Action, PermissionGrant};
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::redirect;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SandboxError;

const MAX_REDIRECTS: usize = 10;

/// Redirect target outside the grant; carried through reqwest's error source.
#[derive(Debug)]
struct RedirectDenied {
    url: String,
}

impl std::fmt::Display for RedirectDenied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "redirect to {} is not allowed", self.url)
    }
}

impl std::error::Error for RedirectDenied {}

fn denied_redirect(e: &reqwest::Error) -> Option<&RedirectDenied> {
    let mut source = std::error::Error::source(e);
    while let Some(err) = source {
        if let Some(denied) = err.downcast_ref::<RedirectDenied>() {
            return Some(denied);
        }
        source = err.source();
    }
    None
}

/// `fetch(url, init)` as sent by the agent.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

pub struct NetworkGateway {
    agent_id: String,
    grant: PermissionGrant,
    http: reqwest::Client,
}

impl NetworkGateway {
    pub fn new(
        agent_id: impl Into<String>,
        grant: PermissionGrant,
        timeout: Duration,
    ) -> Result<Self, SandboxError> {
        let redirect_grant = grant.clone();
        let policy = redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else if redirect_grant.check(Action::Fetch, Some(attempt.url().as_str())) {
                attempt.follow()
            } else {
                let url = attempt.url().to_string();
                attempt.error(RedirectDenied { url })
            }
        });
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(policy)
            .build()
            .map_err(|e| SandboxError::Fetch(e.to_string()))?;
        Ok(Self {
            agent_id: agent_id.into(),
            grant,
            http,
        })
    }

    pub fn grant(&self) -> &PermissionGrant {
        &self.grant
    }

    /// Permission gate for `url`; a denial is recorded as a security event.
    pub fn check(&self, url: &str) -> Result<(), SandboxError> {
        self.grant.require(Action::Fetch, Some(url)).map_err(|e| {
            observability::security_blocked_network(
                &self.agent_id,
                url,
                "host not in manifest network allow-list",
            );
            SandboxError::Permission(e)
        })
    }

    fn redirect_denied(&self, from: &str, to: &str) -> SandboxError {
        observability::security_blocked_network(
            &self.agent_id,
            to,
            &format!("redirect from {} leaves manifest network allow-list", from),
        );
        match self.grant.require(Action::Fetch, Some(to)) {
            Err(e) => SandboxError::Permission(e),
            Ok(()) => SandboxError::Fetch(format!("redirect to {} refused", to)),
        }
    }

    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, SandboxError> {
        self.check(&request.url)?;

        let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| SandboxError::Capability(format!("invalid HTTP method '{}'", request.method)))?;
        let mut req = self.http.request(method.clone(), &request.url);
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| SandboxError::Capability(format!("invalid header name '{}'", name)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| SandboxError::Capability(format!("invalid value for header '{}'", name)))?;
            req = req.header(name, value);
        }
        if let Some(body) = request.body {
            req = req.body(body);
        }

        debug!(agent_id = %self.agent_id, method = %method, url = %request.url, "Gateway fetch");
        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => {
                return Err(match denied_redirect(&e) {
                    Some(denied) => self.redirect_denied(&request.url, &denied.url),
                    None => SandboxError::Fetch(e.to_string()),
                });
            }
        };
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = resp
            .text()
            .await
            .map_err(|e| SandboxError::Fetch(e.to_string()))?;
        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}

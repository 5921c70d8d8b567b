//! Building and dispatching outbound requests on behalf of a job.
//!
//! # Responsibilities
//! - Accumulate method, URL, headers and a fully buffered body
//! - Strip caller-supplied framing headers before dispatch
//! - Bind the job's policy around the shared client's execution
//! - Answer a Basic authentication challenge with matching job credentials
//!
//! # Design Decisions
//! - `Content-Length` and `Transfer-Encoding` are always derived by the
//!   transport from the buffered body
//! - Without a policy of its own the request inherits whatever policy is
//!   already ambient (e.g. the one bound by the job runner)
//! - At most one authentication retry per request

use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, TRANSFER_ENCODING, WWW_AUTHENTICATE,
};
use reqwest::{Method, StatusCode};
use url::Url;

use crate::error::{FetchError, RouteError};
use crate::http::client::{Dispatch, SharedClient};
use crate::http::response::FetchResponse;
use crate::routing::ambient::AmbientJobContext;
use crate::routing::info::MatchInfo;
use crate::routing::policy::EgressPolicy;

/// Creates requests for one job against the shared client.
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    client: Arc<SharedClient>,
    policy: Option<Arc<EgressPolicy>>,
}

impl RequestExecutor {
    pub fn new(client: Arc<SharedClient>, policy: Option<Arc<EgressPolicy>>) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> Option<&Arc<EgressPolicy>> {
        self.policy.as_ref()
    }

    /// Start building a request. Fails if `url` is not a usable target.
    pub fn request(&self, method: Method, url: &str) -> Result<OutboundRequest, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::malformed(url, e))?;
        MatchInfo::from_url(&parsed, &method)?;
        Ok(OutboundRequest {
            client: self.client.clone(),
            policy: self.policy.clone(),
            method,
            url: parsed,
            headers: HeaderMap::new(),
            body: Vec::new(),
        })
    }

    pub fn get(&self, url: &str) -> Result<OutboundRequest, FetchError> {
        self.request(Method::GET, url)
    }
}

/// A request being built.
#[derive(Debug)]
pub struct OutboundRequest {
    client: Arc<SharedClient>,
    policy: Option<Arc<EgressPolicy>>,
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl OutboundRequest {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Append a header value; existing values for `name` are kept.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, FetchError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| FetchError::malformed(self.url.as_str(), format!("header name: {}", e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| FetchError::malformed(self.url.as_str(), format!("header value: {}", e)))?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// The buffered body; write to it before executing.
    pub fn body_mut(&mut self) -> &mut Vec<u8> {
        &mut self.body
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Dispatch the request and wait for the response headers.
    pub async fn execute(mut self) -> Result<FetchResponse, FetchError> {
        strip_framing_headers(&mut self.headers);
        match self.policy.clone() {
            Some(policy) => AmbientJobContext::scope(policy, self.dispatch()).await,
            None => self.dispatch().await,
        }
    }

    async fn dispatch(self) -> Result<FetchResponse, FetchError> {
        let body = Bytes::from(self.body);
        let mut response = self
            .client
            .execute(Dispatch {
                method: self.method.clone(),
                url: self.url.clone(),
                headers: self.headers.clone(),
                body: body.clone(),
                basic_auth: None,
            })
            .await?;

        if !wants_basic_auth(&response) || self.headers.contains_key(AUTHORIZATION) {
            return Ok(response);
        }
        let Some((username, password)) = find_credentials(&self.client, &self.url).await? else {
            return Ok(response);
        };

        tracing::debug!(url = %self.url, username = %username, "Answering Basic authentication challenge");
        response.close();
        self.client
            .execute(Dispatch {
                method: self.method,
                url: self.url,
                headers: self.headers,
                body,
                basic_auth: Some((username, password)),
            })
            .await
    }
}

/// Remove headers the transport must compute from the actual body.
pub fn strip_framing_headers(headers: &mut HeaderMap) {
    for name in [CONTENT_LENGTH, TRANSFER_ENCODING] {
        if headers.remove(&name).is_some() {
            tracing::trace!(header = %name, "Dropped caller-supplied framing header");
        }
    }
}

fn wants_basic_auth(response: &FetchResponse) -> bool {
    response.status() == StatusCode::UNAUTHORIZED
        && response
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.trim_start().to_ascii_lowercase().starts_with("basic"))
}

/// Credentials of the ambient policy for the challenged auth scope.
async fn find_credentials(client: &SharedClient, url: &Url) -> Result<Option<(String, String)>, FetchError> {
    let Some(policy) = AmbientJobContext::current() else {
        return Ok(None);
    };
    let scope = MatchInfo::from_auth_scope(
        url.host_str(),
        url.port_or_known_default().unwrap_or(0),
        Some(url.scheme()),
    );
    let planner = client.planner().clone();
    let found = tokio::task::spawn_blocking(move || {
        policy
            .credentials_for(&scope, planner.resolver())
            .map(|rule| rule.map(|r| (r.username.clone(), r.password.clone())))
    })
    .await
    .map_err(|e| FetchError::from_route(url.as_str(), RouteError::Interrupted(e.to_string())))?;
    found.map_err(|e| FetchError::from_route(url.as_str(), e.into()))
}

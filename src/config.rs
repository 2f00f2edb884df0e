//! Client configuration shared by every channel and REST call.
//!
//! A single [`ClientConfig`] is owned by the top-level client and handed to each
//! channel at construction time; nothing reads domain or token from ambient
//! state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::api::{ApiTransport, HttpTransport};
use crate::realtime::transport::{Connector, WsConnector};
use crate::retry::RetryPolicy;

/// Fixed protocol values and defaults.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RealtimeDefaults;

impl RealtimeDefaults {
    pub const DOMAIN: &'static str = "fishpi.cn";
    pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(3 * 60);
    pub const HEARTBEAT_FRAME: &'static str = "-hb-";
    pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
    pub const REST_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const REST_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(15);
    pub const CLIENT_TYPE: &'static str = "Other";
    pub const CLIENT_VERSION: &'static str = "Latest";
    pub const TOKEN_PARAM: &'static str = "apiKey";
    pub const PEER_PARAM: &'static str = "toUser";
}

/// Client identity reported with chat room sends (`client` field).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Via {
    pub client: String,
    pub version: String,
}

impl Via {
    pub fn new(client: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            version: version.into(),
        }
    }

    /// Parses the `client/version` form used on the wire.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }
        let mut parts = raw.splitn(2, '/');
        let client = parts.next().unwrap_or_default().to_string();
        let version = parts.next().unwrap_or_default().to_string();
        Some(Self { client, version })
    }
}

impl Default for Via {
    fn default() -> Self {
        Self::new(RealtimeDefaults::CLIENT_TYPE, RealtimeDefaults::CLIENT_VERSION)
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.client, self.version)
    }
}

/// Domain, credentials, and transport seams used by every channel.
#[derive(Clone)]
pub struct ClientConfig {
    domain: String,
    secure: bool,
    token: Option<SecretString>,
    via: Via,
    retry_policy: RetryPolicy,
    connector: Arc<dyn Connector>,
    api_transport: Option<Arc<dyn ApiTransport>>,
}

impl ClientConfig {
    /// Creates a configuration for `domain` using TLS transports.
    pub fn new(domain: impl Into<String>) -> Self {
        let domain = domain.into();
        Self {
            domain: domain.trim().trim_end_matches('/').to_string(),
            secure: true,
            token: None,
            via: Via::default(),
            retry_policy: RetryPolicy::default(),
            connector: Arc::new(WsConnector),
            api_transport: None,
        }
    }

    /// Sets the API key used for sockets and REST calls.
    pub fn with_token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }

    /// Replaces (or clears) the API key in place.
    pub fn set_token(&mut self, token: Option<SecretString>) {
        self.token = token;
    }

    /// Switches to `ws://` and `http://` (local servers and tests).
    pub fn with_insecure_transport(mut self, insecure: bool) -> Self {
        self.secure = !insecure;
        self
    }

    /// Sets the client identity reported with chat room sends.
    pub fn with_via(mut self, via: Via) -> Self {
        self.via = via;
        self
    }

    /// Overrides the REST retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Replaces the websocket connector.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Replaces the REST transport.
    pub fn with_api_transport(mut self, transport: Arc<dyn ApiTransport>) -> Self {
        self.api_transport = Some(transport);
        self
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn token(&self) -> Option<&SecretString> {
        self.token.as_ref()
    }

    pub fn via(&self) -> &Via {
        &self.via
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::clone(&self.connector)
    }

    /// Returns the configured REST transport, building the HTTP one on demand.
    pub fn api_transport(&self) -> Result<Arc<dyn ApiTransport>, reqwest::Error> {
        if let Some(transport) = self.api_transport.as_ref() {
            return Ok(Arc::clone(transport));
        }
        let transport = HttpTransport::new(self.rest_base(), self.retry_policy.clone())?;
        Ok(Arc::new(transport))
    }

    /// Base URL for REST calls, always ending in `/`.
    pub fn rest_base(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}/", self.domain)
    }

    /// Builds `ws(s)://<domain>/<path>?apiKey=<token>[&toUser=<peer>]`.
    pub fn socket_url(
        &self,
        path: &str,
        token: Option<&SecretString>,
        peer: Option<&str>,
    ) -> Result<String, url::ParseError> {
        let scheme = if self.secure { "wss" } else { "ws" };
        let mut url = Url::parse(&format!(
            "{scheme}://{}/{}",
            self.domain,
            path.trim_start_matches('/')
        ))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair(
                RealtimeDefaults::TOKEN_PARAM,
                token.map(|token| token.expose_secret().as_str()).unwrap_or(""),
            );
            if let Some(peer) = peer.filter(|peer| !peer.is_empty()) {
                query.append_pair(RealtimeDefaults::PEER_PARAM, peer);
            }
        }
        Ok(url.to_string())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(RealtimeDefaults::DOMAIN)
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("domain", &self.domain)
            .field("secure", &self.secure)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("via", &self.via)
            .finish_non_exhaustive()
    }
}

/// Splits the token query parameter off `url`.
///
/// Returns the URL without it and the token it carried, if non-empty.
pub fn take_token_param(url: &str) -> Result<(String, Option<String>), url::ParseError> {
    let mut parsed = Url::parse(url)?;
    let mut token = None;
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter_map(|(key, value)| {
            if key == RealtimeDefaults::TOKEN_PARAM {
                token = Some(value.into_owned()).filter(|value| !value.is_empty());
                None
            } else {
                Some((key.into_owned(), value.into_owned()))
            }
        })
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(kept);
    }
    Ok((parsed.to_string(), token))
}

/// Sets the token query parameter on `url`, replacing any it already has.
pub fn with_token_param(url: &str, token: Option<&str>) -> Result<String, url::ParseError> {
    let (bare, _) = take_token_param(url)?;
    let mut parsed = Url::parse(&bare)?;
    parsed
        .query_pairs_mut()
        .append_pair(RealtimeDefaults::TOKEN_PARAM, token.unwrap_or(""));
    Ok(parsed.to_string())
}

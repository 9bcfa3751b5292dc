//! Hub configuration.
//!
//! Options use the same names as the JSON option object a hub is usually
//! created from (`queueName`, `routingKeys`, ...). Missing options fall back
//! to the defaults below.

use std::time::Duration;

use serde::Deserialize;

use crate::broker::topic::MATCH_ALL;
use crate::broker::{ExchangeKind, ExchangeOptions, QueueOptions, SubscribeOptions};
use crate::error::HubError;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5672;
pub const DEFAULT_PROTOCOL: &str = "amqp";

/// Heartbeat interval handed to the connector, in seconds
pub const DEFAULT_HEARTBEAT_SECS: u64 = 60;

/// Exchange used when no channel is configured
pub const BROADCAST_EXCHANGE: &str = "amq.fanout";

/// How adapter start-up failures are treated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorMode {
    /// Report the failure on the error channel and carry on as if the adapter
    /// had started
    #[default]
    Lenient,
    /// Report the failure and fail the hub
    Strict,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HubConfig {
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub login: Option<String>,
    pub password: Option<String>,
    pub vhost: Option<String>,
    /// Overrides every other connection option when present
    pub url: Option<String>,
    /// Name of the adapter to start (`pub`, `subDurable`, ...)
    #[serde(alias = "role")]
    pub task: String,
    /// Exchange name
    pub channel: Option<String>,
    pub queue_name: Option<String>,
    pub routing_keys: Option<Vec<String>>,
    pub ack: bool,
    /// Destroy the named queue before the adapter starts
    pub clean: bool,
    /// Seconds
    pub heartbeat: u64,
    /// Bound for every suspending broker operation, in milliseconds.
    /// Defaults to the heartbeat interval.
    pub timeout: Option<u64>,
    /// Outstanding deliveries allowed in ack mode
    pub prefetch: u16,
    pub strict: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            protocol: DEFAULT_PROTOCOL.to_string(),
            login: None,
            password: None,
            vhost: None,
            url: None,
            task: String::new(),
            channel: None,
            queue_name: None,
            routing_keys: None,
            ack: false,
            clean: false,
            heartbeat: DEFAULT_HEARTBEAT_SECS,
            timeout: None,
            prefetch: 1,
            strict: false,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

impl HubConfig {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Default::default()
        }
    }

    /// Parse a JSON option object.
    pub fn from_json(json: &str) -> Result<Self, HubError> {
        serde_json::from_str(json).map_err(HubError::Config)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn with_credentials(mut self, login: impl Into<String>, password: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_vhost(mut self, vhost: impl Into<String>) -> Self {
        self.vhost = Some(vhost.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_queue_name(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = Some(queue_name.into());
        self
    }

    pub fn with_routing_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.routing_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_ack(mut self, ack: bool) -> Self {
        self.ack = ack;
        self
    }

    pub fn with_clean(mut self, clean: bool) -> Self {
        self.clean = clean;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat.as_secs();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn with_error_mode(mut self, mode: ErrorMode) -> Self {
        self.strict = mode == ErrorMode::Strict;
        self
    }

    /// The connection URL: `url` when set, otherwise derived from the other
    /// connection options.
    pub fn url(&self) -> String {
        match non_empty(&self.url) {
            Some(url) => url.to_string(),
            None => self.build_url(),
        }
    }

    /// The connection URL with any password masked, for logging.
    pub fn redacted_url(&self) -> String {
        let url = self.url();
        let Some((scheme, rest)) = url.split_once("://") else {
            return url;
        };
        let authority_end = rest.find('/').unwrap_or(rest.len());
        match rest[..authority_end].rfind('@') {
            Some(at) => {
                let login = rest[..at].split(':').next().unwrap_or_default();
                format!("{}://{}:***{}", scheme, login, &rest[at..])
            }
            None => url,
        }
    }

    /// `protocol://[login:password@]host[:port][vhost]`
    ///
    /// The vhost is appended as given, with no separating slash.
    pub fn build_url(&self) -> String {
        let mut url = format!("{}://", self.protocol);
        if let (Some(login), Some(password)) = (non_empty(&self.login), non_empty(&self.password)) {
            url.push_str(login);
            url.push(':');
            url.push_str(password);
            url.push('@');
        }
        url.push_str(&self.host);
        let port = if self.port == 0 { DEFAULT_PORT } else { self.port };
        url.push(':');
        url.push_str(&port.to_string());
        if let Some(vhost) = non_empty(&self.vhost) {
            url.push_str(vhost);
        }
        url
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat)
    }

    pub fn operation_timeout(&self) -> Duration {
        self.timeout
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.heartbeat())
    }

    pub fn error_mode(&self) -> ErrorMode {
        if self.strict {
            ErrorMode::Strict
        } else {
            ErrorMode::Lenient
        }
    }

    /// Binding patterns; a single match-all wildcard when none are configured.
    pub fn routing_keys(&self) -> Vec<String> {
        self.routing_keys
            .clone()
            .unwrap_or_else(|| vec![MATCH_ALL.to_string()])
    }

    /// The exchange adapters declare: a passive lookup of the broadcast
    /// fanout exchange without a channel, a durable topic exchange otherwise.
    pub fn exchange(&self) -> ExchangeOptions {
        match non_empty(&self.channel) {
            None => ExchangeOptions::passive(BROADCAST_EXCHANGE, ExchangeKind::Fanout),
            Some(channel) => ExchangeOptions::new(channel, ExchangeKind::Topic).durable(true),
        }
    }

    pub fn queue(&self) -> QueueOptions {
        QueueOptions::durable(self.queue_name.clone().unwrap_or_default())
    }

    pub fn subscription(&self) -> SubscribeOptions {
        SubscribeOptions {
            ack: self.ack,
            exclusive: true,
            prefetch: self.prefetch,
        }
    }
}

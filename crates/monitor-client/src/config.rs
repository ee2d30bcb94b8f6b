use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "localhost:9998";
pub const DEFAULT_SERVICE: &str = "clientapi.ClientService";

/// Construction-time options for a [`crate::MonitorClient`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
	/// Target address, `host:port` or a full `http(s)://` URI
	pub endpoint: String,
	/// Use TLS instead of plaintext HTTP/2
	pub secure: bool,
	/// Default per-call deadline for unary commands
	pub deadline_ms: Option<u64>,
	/// Fully qualified service name the methods live under
	pub service: String,
	/// Events held per subscription before the transport is back-pressured
	pub stream_buffer: usize,
	pub connect_timeout_ms: Option<u64>,
	/// Sent as `authorization: Bearer <token>` when present
	pub auth_token: Option<String>,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			endpoint: DEFAULT_ENDPOINT.to_string(),
			secure: false,
			deadline_ms: None,
			service: DEFAULT_SERVICE.to_string(),
			stream_buffer: 16,
			connect_timeout_ms: Some(5_000),
			auth_token: None,
		}
	}
}

impl ClientConfig {
	#[must_use]
	pub fn new(endpoint: impl Into<String>) -> Self {
		Self {
			endpoint: endpoint.into(),
			..Self::default()
		}
	}

	#[must_use]
	pub const fn with_secure(mut self, secure: bool) -> Self {
		self.secure = secure;
		self
	}

	#[must_use]
	pub const fn with_deadline_ms(mut self, deadline_ms: Option<u64>) -> Self {
		self.deadline_ms = deadline_ms;
		self
	}

	/// Load configuration from environment variables with sensible defaults
	pub fn from_env() -> Result<Self> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// Build from `MONITOR_*` settings; values that are set but malformed are errors
	fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
		let defaults = Self::default();
		let config = Self {
			endpoint: lookup("MONITOR_ENDPOINT").unwrap_or(defaults.endpoint),
			secure: lookup("MONITOR_SECURE").map_or(Ok(false), |v| parse_bool(&v))?,
			deadline_ms: lookup("MONITOR_DEADLINE_MS").filter(|v| !v.trim().is_empty()).map(|v| parse_millis(&v)).transpose()?,
			service: lookup("MONITOR_SERVICE").unwrap_or(defaults.service),
			auth_token: lookup("MONITOR_AUTH_TOKEN").filter(|t| !t.is_empty()),
			..defaults
		};
		config.validate()?;
		Ok(config)
	}

	#[must_use]
	pub fn deadline(&self) -> Option<Duration> {
		self.deadline_ms.map(Duration::from_millis)
	}

	#[must_use]
	pub fn connect_timeout(&self) -> Option<Duration> {
		self.connect_timeout_ms.map(Duration::from_millis)
	}

	/// Check the options without touching the network
	pub fn validate(&self) -> Result<()> {
		if self.service.trim().is_empty() {
			return Err(ClientError::Config("service name must not be empty".into()));
		}
		if self.stream_buffer == 0 {
			return Err(ClientError::Config("stream_buffer must be at least 1".into()));
		}
		self.authority().map(|_| ())
	}

	/// `host:port` part of the endpoint
	pub fn authority(&self) -> Result<String> {
		let endpoint = self.endpoint.trim();
		let rest = endpoint.split_once("://").map_or(endpoint, |(_, rest)| rest);
		let authority = rest.split('/').next().unwrap_or_default();

		let (host, port) = authority
			.rsplit_once(':')
			.ok_or_else(|| ClientError::Config(format!("endpoint '{}' is missing a port", self.endpoint)))?;
		if host.is_empty() {
			return Err(ClientError::Config(format!("endpoint '{}' is missing a host", self.endpoint)));
		}
		port
			.parse::<u16>()
			.map_err(|_| ClientError::Config(format!("endpoint '{}' has an invalid port", self.endpoint)))?;

		Ok(authority.to_string())
	}

	/// URI handed to the channel. The scheme always follows `secure`.
	pub fn uri(&self) -> Result<String> {
		let authority = self.authority()?;
		let scheme = if self.secure { "https" } else { "http" };
		Ok(format!("{scheme}://{authority}"))
	}
}

fn parse_millis(value: &str) -> Result<u64> {
	value
		.trim()
		.parse()
		.map_err(|_| ClientError::Config(format!("expected a deadline in milliseconds, got '{value}'")))
}

fn parse_bool(value: &str) -> Result<bool> {
	match value.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Ok(true),
		"0" | "false" | "no" | "off" | "" => Ok(false),
		other => Err(ClientError::Config(format!("expected a boolean, got '{other}'"))),
	}
}

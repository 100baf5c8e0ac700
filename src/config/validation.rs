//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate identifiers and URLs before any connection is made
//! - Validate value ranges (timeouts > 0, poll interval > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ChainwatchConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::ChainwatchConfig;
use crate::ledger::store::is_valid_network_name;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn check_url(field: &str, raw: &str, errors: &mut Vec<ValidationError>) {
    match url::Url::parse(raw) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
        Ok(parsed) => errors.push(ValidationError::new(
            field,
            format!("unsupported scheme '{}'", parsed.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new(field, format!("invalid URL: {}", e))),
    }
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ChainwatchConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let name = &config.network.name;
    if !is_valid_network_name(name) {
        errors.push(ValidationError::new(
            "network.name",
            "must match [a-z][a-z0-9_]*",
        ));
    }

    check_url("rpc.url", &config.rpc.url, &mut errors);
    for (i, url) in config.rpc.failover_urls.iter().enumerate() {
        check_url(&format!("rpc.failover_urls[{}]", i), url, &mut errors);
    }
    if config.rpc.timeout_secs == 0 {
        errors.push(ValidationError::new("rpc.timeout_secs", "must be greater than 0"));
    }
    if config.rpc.password.is_some() && config.rpc.username.is_none() {
        errors.push(ValidationError::new("rpc.password", "set without rpc.username"));
    }

    if config.ledger.url.trim().is_empty() {
        errors.push(ValidationError::new("ledger.url", "must not be empty"));
    }

    if config.monitor.poll_interval_ms == 0 {
        errors.push(ValidationError::new(
            "monitor.poll_interval_ms",
            "must be greater than 0",
        ));
    }

    if config.retries.max_delay_ms < config.retries.retry_delay_ms {
        errors.push(ValidationError::new(
            "retries.max_delay_ms",
            "must not be smaller than retries.retry_delay_ms",
        ));
    }

    if config.fees.conf_target == 0 {
        errors.push(ValidationError::new("fees.conf_target", "must be at least 1"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address such as 127.0.0.1:9090",
        ));
    }

    for (i, entry) in config.addresses.iter().enumerate() {
        if entry.address.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("addresses[{}].address", i),
                "must not be empty",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

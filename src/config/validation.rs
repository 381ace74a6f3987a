//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid)
//! - Check hostname templates carry the placeholders they need
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address `{0}` is not a socket address")]
    BindAddress(String),

    #[error("routing.public_domains must not be empty")]
    NoPublicDomains,

    #[error("routing.public_domains entry `{0}` is not a bare hostname")]
    PublicDomain(String),

    #[error("routing.{field} must contain `{placeholder}`")]
    Template {
        field: &'static str,
        placeholder: &'static str,
    },

    #[error("routing.{0} must be a non-zero port")]
    Port(&'static str),

    #[error("timeouts.{0} must be greater than zero")]
    Timeout(&'static str),

    #[error("observability.metrics_address `{0}` is not a socket address")]
    MetricsAddress(String),
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    let routing = &config.routing;
    if routing.public_domains.is_empty() {
        errors.push(ValidationError::NoPublicDomains);
    }
    for domain in &routing.public_domains {
        let bare = !domain.is_empty()
            && !domain.starts_with('.')
            && !domain.contains(['/', ':', ' '])
            && domain.to_ascii_lowercase() == *domain;
        if !bare {
            errors.push(ValidationError::PublicDomain(domain.clone()));
        }
    }

    if routing.control_port == 0 {
        errors.push(ValidationError::Port("control_port"));
    }
    if routing.router_port == 0 {
        errors.push(ValidationError::Port("router_port"));
    }

    let templates: [(&'static str, &str, &[&'static str]); 3] = [
        ("port_template", routing.port_template.as_str(), &["{port}", "{morph_id}"][..]),
        ("cmux_template", routing.cmux_template.as_str(), &["{morph_id}"][..]),
        ("workspace_template", routing.workspace_template.as_str(), &["{vm_slug}"][..]),
    ];
    for (field, template, placeholders) in templates {
        for &placeholder in placeholders {
            if !template.contains(placeholder) {
                errors.push(ValidationError::Template { field, placeholder });
            }
        }
    }

    let timeouts = &config.timeouts;
    if timeouts.connect_secs == 0 {
        errors.push(ValidationError::Timeout("connect_secs"));
    }
    if timeouts.upstream_secs == 0 {
        errors.push(ValidationError::Timeout("upstream_secs"));
    }
    if timeouts.request_secs == 0 {
        errors.push(ValidationError::Timeout("request_secs"));
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

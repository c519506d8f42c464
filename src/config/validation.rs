//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges and addresses
//! - Check that TLS material is complete and present on disk
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function of the config plus file existence

use std::net::SocketAddr;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ChainConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: {value:?} is not a socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("listener.tls: cert_path and key_path must be set together")]
    IncompleteTls,

    #[error("{field}: file {path:?} not found")]
    MissingFile { field: &'static str, path: String },

    #[error("observability.log_level: invalid filter {0:?}")]
    InvalidLogLevel(String),
}

pub fn validate_config(config: &ChainConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero {
            field: "listener.max_connections",
        });
    }
    if config.controller.read_buffer_size == 0 {
        errors.push(ValidationError::Zero {
            field: "controller.read_buffer_size",
        });
    }

    if let Some(tls) = &config.listener.tls {
        match (&tls.cert_path, &tls.key_path) {
            (Some(cert), Some(key)) => {
                check_file(&mut errors, "listener.tls.cert_path", cert);
                check_file(&mut errors, "listener.tls.key_path", key);
            }
            _ => errors.push(ValidationError::IncompleteTls),
        }
        for ca in &tls.ca_paths {
            check_file(&mut errors, "listener.tls.ca_paths", ca);
        }
    }

    let observability = &config.observability;
    if observability.log_level.parse::<tracing_subscriber::EnvFilter>().is_err() {
        errors.push(ValidationError::InvalidLogLevel(
            observability.log_level.clone(),
        ));
    }
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_file(errors: &mut Vec<ValidationError>, field: &'static str, path: &Path) {
    if !path.exists() {
        errors.push(ValidationError::MissingFile {
            field,
            path: path.display().to_string(),
        });
    }
}

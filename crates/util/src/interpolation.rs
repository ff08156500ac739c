//! `${env:NAME}` interpolation for credential and configuration values.

use conduit_types::{CredentialMap, ServiceCredentials};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

static ENV_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{env:([\w+_-]*)}").expect("valid env placeholder regex"));

/// Errors that can occur during interpolation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InterpolationError {
    #[error("Missing environment variable: {name}")]
    MissingEnvVar { name: String },

    #[error("Missing environment variable {name} referenced by credential {service}.{field}")]
    MissingCredentialVar { service: String, field: String, name: String },
}

/// Interpolate a string value, replacing every `${env:NAME}` with the variable's value.
pub fn interpolate_string(value: &str) -> Result<String, InterpolationError> {
    let mut resolved = Vec::new();
    for captures in ENV_PLACEHOLDER.captures_iter(value) {
        let var_name = captures[1].to_string();
        let env_value = std::env::var(&var_name).map_err(|_| InterpolationError::MissingEnvVar { name: var_name.clone() })?;
        debug!("Interpolated env var: {} -> [REDACTED]", var_name);
        resolved.push((captures[0].to_string(), env_value));
    }

    let mut result = value.to_string();
    for (placeholder, env_value) in resolved {
        result = result.replace(&placeholder, &env_value);
    }
    Ok(result)
}

/// Interpolate every credential field of every service.
pub fn interpolate_credentials(credentials: &CredentialMap) -> Result<CredentialMap, InterpolationError> {
    let mut interpolated = CredentialMap::with_capacity(credentials.len());
    for (service, fields) in credentials {
        let mut resolved_fields = ServiceCredentials::with_capacity(fields.len());
        for (field, value) in fields {
            let resolved = interpolate_string(value).map_err(|error| match error {
                InterpolationError::MissingEnvVar { name } => InterpolationError::MissingCredentialVar {
                    service: service.clone(),
                    field: field.clone(),
                    name,
                },
                other => other,
            })?;
            resolved_fields.insert(field.clone(), resolved);
        }
        interpolated.insert(service.clone(), resolved_fields);
    }
    Ok(interpolated)
}

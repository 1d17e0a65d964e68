use std::str::FromStr;

use anyhow::{Context, Result};

/// Load an environment variable and parse it to the given type
///
/// # Errors
///
/// Returns an error if the environment variable is not set or is not a valid value for the given type
pub fn load_env_var<T: FromStr>(var_name: &str) -> Result<T> {
    let var = std::env::var(var_name).context(format!("{} is not set", var_name))?;
    parse_env_value(var_name, &var)
}

/// Load an environment variable, falling back to `default` when it is not set
///
/// # Errors
///
/// Returns an error if the variable is set but cannot be parsed
pub fn load_env_var_or<T: FromStr>(var_name: &str, default: T) -> Result<T> {
    match load_optional_env_var(var_name)? {
        Some(value) => Ok(value),
        None => Ok(default),
    }
}

/// Load an environment variable that may be absent or empty
pub fn load_optional_env_var<T: FromStr>(var_name: &str) -> Result<Option<T>> {
    match std::env::var(var_name) {
        Ok(var) if !var.trim().is_empty() => parse_env_value(var_name, &var).map(Some),
        _ => Ok(None),
    }
}

fn parse_env_value<T: FromStr>(var_name: &str, var: &str) -> Result<T> {
    var.trim()
        .parse::<T>()
        .map_err(|_| anyhow::anyhow!("{} is not a valid {}", var, var_name))
}

//! Validation helpers and parsing utilities for configuration values.

use std::net::SocketAddr;

use crate::error::{ConfigError, ConfigResult};

/// Largest accepted bandwidth limit, in KiB/s (100 MiB/s).
pub const MAX_SPEED_LIMIT_KIB: i64 = 102_400;

/// Validate a bandwidth limit expressed in KiB/s; zero means unlimited.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] when the value is negative or above
/// [`MAX_SPEED_LIMIT_KIB`].
pub fn validate_speed_limit(field: &'static str, value: i64) -> ConfigResult<u64> {
    if value < 0 {
        return Err(ConfigError::invalid("settings", field, value, "negative"));
    }
    if value > MAX_SPEED_LIMIT_KIB {
        return Err(ConfigError::invalid("settings", field, value, "too_large"));
    }
    u64::try_from(value).map_err(|_| ConfigError::invalid("settings", field, value, "negative"))
}

/// Validate a bind address such as `127.0.0.1:8080`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] when the value does not parse.
pub fn parse_bind_addr(value: &str) -> ConfigResult<SocketAddr> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid("server", "bind_addr", value, "invalid_socket_addr"))
}

/// Interpret an environment flag; `1`, `true`, `yes` and `on` are truthy.
#[must_use]
pub fn env_flag_value(value: Option<&str>) -> bool {
    value.is_some_and(|v| {
        matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_limit_bounds() {
        assert_eq!(validate_speed_limit("max_download_speed", 0).ok(), Some(0));
        assert_eq!(
            validate_speed_limit("max_download_speed", MAX_SPEED_LIMIT_KIB).ok(),
            Some(102_400)
        );
        for (value, expected) in [(-1, "negative"), (102_401, "too_large")] {
            match validate_speed_limit("max_upload_speed", value) {
                Err(ConfigError::InvalidField { reason, field, .. }) => {
                    assert_eq!(reason, expected);
                    assert_eq!(field, "max_upload_speed");
                }
                other => panic!("unexpected result: {other:?}"),
            }
        }
    }

    #[test]
    fn env_flags_accept_common_truthy_values() {
        for value in ["1", "true", "YES", " on "] {
            assert!(env_flag_value(Some(value)));
        }
        for value in ["0", "false", "", "enabled"] {
            assert!(!env_flag_value(Some(value)));
        }
        assert!(!env_flag_value(None));
    }

    #[test]
    fn bind_addr_parses_or_reports_field() {
        assert!(parse_bind_addr("0.0.0.0:9000").is_ok());
        assert!(matches!(
            parse_bind_addr("localhost"),
            Err(ConfigError::InvalidField {
                field: "bind_addr",
                ..
            })
        ));
    }
}

use std::str::FromStr;
use std::time;

use envconfig::Envconfig;
use lifecycle::ShutdownPolicy;
use thiserror::Error;

use crate::server::ServerSettings;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8080")]
    pub port: u16,

    #[envconfig(from = "HEARTBEAT_INTERVAL_MS", default = "30000")]
    pub heartbeat_interval: EnvNonZeroMsDuration,

    #[envconfig(from = "SHUTDOWN_GRACE_PERIOD_MS", default = "2000")]
    pub shutdown_grace_period: EnvMsDuration,

    #[envconfig(from = "SHUTDOWN_POLICY", default = "fixed")]
    pub shutdown_policy: ShutdownPolicy,

    #[envconfig(from = "HTTP_READ_TIMEOUT_MS", default = "10000")]
    pub http_read_timeout: EnvNonZeroMsDuration,

    #[envconfig(from = "HTTP_WRITE_TIMEOUT_MS", default = "10000")]
    pub http_write_timeout: EnvNonZeroMsDuration,

    #[envconfig(from = "HTTP_IDLE_TIMEOUT_MS", default = "120000")]
    pub http_idle_timeout: EnvNonZeroMsDuration,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn server_settings(&self) -> ServerSettings {
        ServerSettings {
            read_timeout: self.http_read_timeout.0,
            write_timeout: self.http_write_timeout.0,
            idle_timeout: self.http_idle_timeout.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMsDuration(pub time::Duration);

/// Milliseconds that must be greater than zero: intervals and timeouts, where zero
/// would mean "always expired".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvNonZeroMsDuration(pub time::Duration);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseEnvMsDurationError {
    #[error("expected a non-negative number of milliseconds")]
    Invalid,
    #[error("must be greater than zero")]
    Zero,
}

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s
            .parse::<u64>()
            .map_err(|_| ParseEnvMsDurationError::Invalid)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

impl FromStr for EnvNonZeroMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let EnvMsDuration(duration) = s.parse()?;
        if duration.is_zero() {
            return Err(ParseEnvMsDurationError::Zero);
        }

        Ok(EnvNonZeroMsDuration(duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults() {
        let config = Config::init_from_hashmap(&HashMap::new()).unwrap();

        assert_eq!(config.bind(), "0.0.0.0:8080");
        assert_eq!(config.heartbeat_interval.0, Duration::from_secs(30));
        assert_eq!(config.shutdown_grace_period.0, Duration::from_secs(2));
        assert_eq!(config.shutdown_policy, ShutdownPolicy::FixedDelay);

        let server = config.server_settings();
        assert_eq!(server.read_timeout, Duration::from_secs(10));
        assert_eq!(server.write_timeout, Duration::from_secs(10));
        assert_eq!(server.idle_timeout, Duration::from_secs(120));
    }

    #[test]
    fn overrides() {
        let config = Config::init_from_hashmap(&env(&[
            ("BIND_HOST", "127.0.0.1"),
            ("BIND_PORT", "9090"),
            ("HEARTBEAT_INTERVAL_MS", "10"),
            ("SHUTDOWN_POLICY", "drain"),
        ]))
        .unwrap();

        assert_eq!(config.bind(), "127.0.0.1:9090");
        assert_eq!(config.heartbeat_interval.0, Duration::from_millis(10));
        assert_eq!(config.shutdown_policy, ShutdownPolicy::Drain);
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(Config::init_from_hashmap(&env(&[("HEARTBEAT_INTERVAL_MS", "soon")])).is_err());
        assert!(Config::init_from_hashmap(&env(&[("BIND_PORT", "80800")])).is_err());
        assert!(Config::init_from_hashmap(&env(&[("SHUTDOWN_POLICY", "never")])).is_err());
    }

    #[test]
    fn zero_intervals_and_timeouts_are_rejected() {
        for name in [
            "HEARTBEAT_INTERVAL_MS",
            "HTTP_READ_TIMEOUT_MS",
            "HTTP_WRITE_TIMEOUT_MS",
            "HTTP_IDLE_TIMEOUT_MS",
        ] {
            assert!(
                Config::init_from_hashmap(&env(&[(name, "0")])).is_err(),
                "{name}=0 was accepted"
            );
        }
    }

    #[test]
    fn zero_grace_period_is_allowed() {
        let config =
            Config::init_from_hashmap(&env(&[("SHUTDOWN_GRACE_PERIOD_MS", "0")])).unwrap();

        assert!(config.shutdown_grace_period.0.is_zero());
    }

    #[test]
    fn parse_ms_duration() {
        assert_eq!(
            "1500".parse::<EnvMsDuration>(),
            Ok(EnvMsDuration(Duration::from_millis(1500)))
        );
        assert_eq!(
            "-1".parse::<EnvMsDuration>(),
            Err(ParseEnvMsDurationError::Invalid)
        );
        assert_eq!(
            "0".parse::<EnvMsDuration>(),
            Ok(EnvMsDuration(Duration::ZERO))
        );
    }

    #[test]
    fn parse_non_zero_ms_duration() {
        assert_eq!(
            "10".parse::<EnvNonZeroMsDuration>(),
            Ok(EnvNonZeroMsDuration(Duration::from_millis(10)))
        );
        assert_eq!(
            "0".parse::<EnvNonZeroMsDuration>(),
            Err(ParseEnvMsDurationError::Zero)
        );
        assert_eq!(
            "soon".parse::<EnvNonZeroMsDuration>(),
            Err(ParseEnvMsDurationError::Invalid)
        );
    }
}

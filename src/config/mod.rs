//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

/// Relay configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit logs as JSON lines (LOG_FORMAT=json)
    pub log_json: bool,

    /// Seconds of input history each player log retains
    pub history_window_secs: f64,
    /// How far behind a player's newest input the relay replays
    pub playout_delay_secs: f64,
    /// Max binary input packets per second per connection
    pub input_rate_limit: u32,
    /// Max players per room
    pub max_room_players: usize,

    /// Allowed client origins for CORS (comma-separated, `*` for any)
    pub client_origin: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
            log_json: false,
            history_window_secs: 2.0,
            playout_delay_secs: 0.1,
            input_rate_limit: 60,
            max_room_players: 16,
            client_origin: "*".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = match env::var("PORT") {
            Ok(port) => format!("0.0.0.0:{}", port)
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            Err(_) => match env::var("SERVER_ADDR") {
                Ok(addr) => addr.parse().map_err(|_| ConfigError::InvalidAddress)?,
                Err(_) => defaults.server_addr,
            },
        };

        let history_window_secs: f64 =
            parse_or("HISTORY_WINDOW_SECS", defaults.history_window_secs)?;
        if !history_window_secs.is_finite() || history_window_secs <= 0.0 {
            return Err(ConfigError::Invalid("HISTORY_WINDOW_SECS"));
        }

        let playout_delay_secs: f64 =
            parse_or("PLAYOUT_DELAY_SECS", defaults.playout_delay_secs)?;
        if !(0.0..history_window_secs).contains(&playout_delay_secs) {
            return Err(ConfigError::Invalid("PLAYOUT_DELAY_SECS"));
        }

        let input_rate_limit = parse_or("INPUT_RATE_LIMIT", defaults.input_rate_limit)?;
        let max_room_players = parse_or("MAX_ROOM_PLAYERS", defaults.max_room_players)?;
        if max_room_players == 0 {
            return Err(ConfigError::Invalid("MAX_ROOM_PLAYERS"));
        }

        Ok(Self {
            server_addr,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_json: env::var("LOG_FORMAT")
                .map(|f| f.eq_ignore_ascii_case("json"))
                .unwrap_or(defaults.log_json),
            history_window_secs,
            playout_delay_secs,
            input_rate_limit,
            max_room_players,
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or(defaults.client_origin),
        })
    }
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = Config::default();
        assert_eq!(config.server_addr.port(), 8080);
        assert!(config.history_window_secs > 0.0);
        assert!(config.playout_delay_secs < config.history_window_secs);
        assert!(config.max_room_players > 0);
    }

    #[test]
    fn parse_or_falls_back_when_unset() {
        let value: u32 = parse_or("REPLAY_SYNC_TEST_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(value, 7);
    }
}

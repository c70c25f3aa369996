//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Protocol/version tag announced on connect
    pub game_version: String,
    /// Name of the shared room
    pub room_name: String,
    /// Maximum players per room
    pub room_capacity: usize,
    /// Radius of the spawn circle around the room origin
    pub spawn_radius: f32,
    /// Delay between joining the room and spawning the avatar
    pub spawn_delay: Duration,

    /// Health of a fresh avatar
    pub max_health: i32,
    /// Delay between death and respawn
    pub respawn_delay: Duration,

    /// Snapshot send rate (per second)
    pub sync_rate_hz: u32,
    /// Frame step rate for interpolation (per second)
    pub frame_rate_hz: u32,
    /// Interpolation gain k in f = min(1, k * dt)
    pub interpolation_gain: f32,

    /// Number of in-process participants the binary runs
    pub demo_peers: usize,
    /// Status HTTP binding address (disabled when unset)
    pub status_addr: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            game_version: "1.0".to_string(),
            room_name: "VRArena".to_string(),
            room_capacity: 4,
            spawn_radius: 5.0,
            spawn_delay: Duration::from_millis(500),
            max_health: 100,
            respawn_delay: Duration::from_secs(3),
            sync_rate_hz: 20,
            frame_rate_hz: 60,
            interpolation_gain: 10.0,
            demo_peers: 2,
            status_addr: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            game_version: env::var("GAME_VERSION").unwrap_or(defaults.game_version),
            room_name: env::var("ROOM_NAME").unwrap_or(defaults.room_name),
            room_capacity: parse_or("ROOM_CAPACITY", defaults.room_capacity)?,
            spawn_radius: parse_or("SPAWN_RADIUS", defaults.spawn_radius)?,
            spawn_delay: parse_millis_or("SPAWN_DELAY_MS", defaults.spawn_delay)?,
            max_health: parse_or("MAX_HEALTH", defaults.max_health)?,
            respawn_delay: parse_millis_or("RESPAWN_DELAY_MS", defaults.respawn_delay)?,
            sync_rate_hz: parse_or("SYNC_RATE_HZ", defaults.sync_rate_hz)?,
            frame_rate_hz: parse_or("FRAME_RATE_HZ", defaults.frame_rate_hz)?,
            interpolation_gain: parse_or("INTERPOLATION_GAIN", defaults.interpolation_gain)?,
            demo_peers: parse_or("DEMO_PEERS", defaults.demo_peers)?,
            status_addr: match env::var("STATUS_ADDR") {
                Ok(addr) => Some(addr.parse().map_err(|_| ConfigError::InvalidAddress)?),
                Err(_) => None,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the session cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.room_capacity == 0 {
            return Err(ConfigError::Invalid("ROOM_CAPACITY"));
        }
        if self.max_health <= 0 {
            return Err(ConfigError::Invalid("MAX_HEALTH"));
        }
        if self.sync_rate_hz == 0 {
            return Err(ConfigError::Invalid("SYNC_RATE_HZ"));
        }
        if self.frame_rate_hz == 0 {
            return Err(ConfigError::Invalid("FRAME_RATE_HZ"));
        }
        if !(self.spawn_radius.is_finite() && self.spawn_radius >= 0.0) {
            return Err(ConfigError::Invalid("SPAWN_RADIUS"));
        }
        if !(self.interpolation_gain.is_finite() && self.interpolation_gain > 0.0) {
            return Err(ConfigError::Invalid("INTERPOLATION_GAIN"));
        }
        Ok(())
    }
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

fn parse_millis_or(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid status address format")]
    InvalidAddress,
}

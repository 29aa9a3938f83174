//! Server Configuration
//!
//! Every recognised tuning knob in one place, with defaults matching the
//! game rules. Values can be overridden from `QUIZ_*` environment
//! variables; unparsable values fall back to the default.

use std::net::SocketAddr;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address for the websocket listener.
    pub bind_addr: SocketAddr,
    /// Websocket endpoint path.
    pub endpoint_path: String,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Maximum inbound message size in bytes.
    pub max_message_bytes: usize,
    /// Seconds a player has to answer each question.
    pub question_time_secs: u64,
    /// Grace added to the question deadline timer.
    pub question_grace_secs: u64,
    /// Questions per match.
    pub total_questions: usize,
    /// Seconds both players have to confirm a pairing.
    pub confirm_timeout_secs: u64,
    /// Delay between both-confirmed and match start.
    pub start_delay_secs: u64,
    /// Delay between consecutive questions.
    pub inter_question_delay_secs: u64,
    /// Minutes before an idle lobby expires.
    pub lobby_ttl_mins: u64,
    /// Seconds without a ping before a session is swept.
    pub idle_timeout_secs: u64,
    /// Cadence of the idle/expiry sweeper.
    pub sweep_interval_secs: u64,
    /// Seconds a finished match stays in memory.
    pub cleanup_delay_secs: u64,
    /// Elo K-factor for ranked rating updates.
    pub rating_k: i32,
    /// Preferred rating distance when pairing ranked players.
    pub mmr_window: i32,
    /// Health lost on an answer (own wrong answer or opponent's correct one).
    pub damage_per_answer: i32,
    /// Health lost by both players when a question times out.
    pub damage_on_timeout: i32,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().unwrap(),
            endpoint_path: "/api/quiz/battle".to_string(),
            max_connections: 1000,
            max_message_bytes: 64 * 1024,
            question_time_secs: 10,
            question_grace_secs: 1,
            total_questions: 5,
            confirm_timeout_secs: 30,
            start_delay_secs: 3,
            inter_question_delay_secs: 3,
            lobby_ttl_mins: 30,
            idle_timeout_secs: 60,
            sweep_interval_secs: 30,
            cleanup_delay_secs: 5,
            rating_k: 32,
            mmr_window: 200,
            damage_per_answer: 10,
            damage_on_timeout: 10,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(port) = read_env::<u16>("QUIZ_WS_PORT") {
            config.bind_addr = SocketAddr::new(config.bind_addr.ip(), port);
        }
        if let Ok(addr) = std::env::var("QUIZ_BIND_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.bind_addr = parsed;
            }
        }

        read_env_into(&mut config.max_connections, "QUIZ_MAX_CONNECTIONS");
        read_env_into(&mut config.question_time_secs, "QUIZ_QUESTION_TIME_SECS");
        read_env_into(&mut config.total_questions, "QUIZ_TOTAL_QUESTIONS");
        read_env_into(&mut config.confirm_timeout_secs, "QUIZ_CONFIRM_TIMEOUT_SECS");
        read_env_into(&mut config.lobby_ttl_mins, "QUIZ_LOBBY_TTL_MINS");
        read_env_into(&mut config.idle_timeout_secs, "QUIZ_IDLE_TIMEOUT_SECS");
        read_env_into(&mut config.rating_k, "QUIZ_RATING_K");
        read_env_into(&mut config.mmr_window, "QUIZ_MMR_WINDOW");
        read_env_into(&mut config.damage_per_answer, "QUIZ_DAMAGE_PER_ANSWER");
        read_env_into(&mut config.damage_on_timeout, "QUIZ_DAMAGE_ON_TIMEOUT");

        config
    }

    /// Full per-question deadline: answer time plus grace.
    pub fn question_deadline(&self) -> Duration {
        Duration::from_secs(self.question_time_secs + self.question_grace_secs)
    }

    /// Confirmation deadline for a pending pairing.
    pub fn confirm_deadline(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    /// Lobby time-to-live.
    pub fn lobby_ttl(&self) -> Duration {
        Duration::from_secs(self.lobby_ttl_mins * 60)
    }
}

fn read_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn read_env_into<T: std::str::FromStr>(slot: &mut T, key: &str) {
    if let Some(value) = read_env(key) {
        *slot = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_game_rules() {
        let config = ServerConfig::default();
        assert_eq!(config.question_time_secs, 10);
        assert_eq!(config.total_questions, 5);
        assert_eq!(config.confirm_timeout_secs, 30);
        assert_eq!(config.idle_timeout_secs, 60);
        assert_eq!(config.rating_k, 32);
        assert_eq!(config.mmr_window, 200);
        assert_eq!(config.damage_per_answer, 10);
        assert_eq!(config.damage_on_timeout, 10);
        assert_eq!(config.max_message_bytes, 64 * 1024);
        assert_eq!(config.endpoint_path, "/api/quiz/battle");
    }

    #[test]
    fn test_question_deadline_includes_grace() {
        let config = ServerConfig::default();
        assert_eq!(config.question_deadline(), Duration::from_secs(11));
    }

    #[test]
    fn test_lobby_ttl() {
        let config = ServerConfig::default();
        assert_eq!(config.lobby_ttl(), Duration::from_secs(30 * 60));
    }
}

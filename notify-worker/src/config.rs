use std::str::FromStr;
use std::time;

use envconfig::Envconfig;
use rdkafka::ClientConfig;
use thiserror::Error;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3310")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub redis: RedisConfig,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub dedup: DedupConfig,

    #[envconfig(nested = true)]
    pub frequency_limit: FrequencyLimitConfig,

    #[envconfig(nested = true)]
    pub quiet_hours: QuietHoursConfig,

    #[envconfig(nested = true)]
    pub sensitive_words: SensitiveWordsConfig,

    #[envconfig(nested = true)]
    pub worker: WorkerPoolConfig,
}

#[derive(Envconfig, Clone)]
pub struct RedisConfig {
    #[envconfig(default = "redis://localhost:6379/")]
    pub redis_url: String,

    #[envconfig(default = "100")]
    pub redis_response_timeout_ms: EnvMsDuration,

    #[envconfig(default = "5000")]
    pub redis_connection_timeout_ms: EnvMsDuration,
}

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "notify-worker")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "notify_send_tasks")]
    pub kafka_consumer_topic: String,

    #[envconfig(default = "latest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest
}

impl From<&KafkaConfig> for ClientConfig {
    fn from(config: &KafkaConfig) -> Self {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("group.id", &config.kafka_consumer_group)
            .set("auto.offset.reset", &config.kafka_consumer_offset_reset)
            .set("enable.auto.offset.store", "false");

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };
        client_config
    }
}

#[derive(Envconfig, Clone)]
pub struct DedupConfig {
    #[envconfig(default = "300")]
    pub dedup_expire_seconds: u64,

    #[envconfig(default = "check_then_set")]
    pub dedup_mode: DedupMode,

    // Whether a receiver is kept when the store cannot answer
    #[envconfig(default = "true")]
    pub dedup_fail_open: bool,
}

#[derive(Envconfig, Clone)]
pub struct FrequencyLimitConfig {
    #[envconfig(default = "true")]
    pub frequency_limit_enabled: bool,

    #[envconfig(default = "5")]
    pub frequency_limit_day_max: u64,

    #[envconfig(default = "2")]
    pub frequency_limit_hour_max: u64,
}

#[derive(Envconfig, Clone)]
pub struct QuietHoursConfig {
    #[envconfig(default = "true")]
    pub quiet_hours_enabled: bool,

    #[envconfig(default = "21")]
    pub quiet_hours_start_hour: u32,

    #[envconfig(default = "8")]
    pub quiet_hours_end_hour: u32,
}

#[derive(Envconfig, Clone)]
pub struct SensitiveWordsConfig {
    #[envconfig(default = "true")]
    pub sensitive_words_enabled: bool,

    #[envconfig(default = "*")]
    pub sensitive_words_mask: String,

    // One word per line, merged with the built-in list
    pub sensitive_words_path: Option<String>,
}

impl SensitiveWordsConfig {
    pub fn mask(&self) -> Result<char, ConfigError> {
        let mut chars = self.sensitive_words_mask.chars();
        match (chars.next(), chars.next()) {
            (Some(mask), None) => Ok(mask),
            _ => Err(ConfigError::InvalidMask(
                self.sensitive_words_mask.clone(),
            )),
        }
    }
}

#[derive(Envconfig, Clone)]
pub struct WorkerPoolConfig {
    #[envconfig(default = "4")]
    pub worker_core_size: usize,

    #[envconfig(default = "8")]
    pub worker_max_size: usize,

    #[envconfig(default = "128")]
    pub worker_queue_capacity: usize,

    #[envconfig(default = "60")]
    pub worker_keep_alive_secs: u64,
}

impl WorkerPoolConfig {
    pub fn keep_alive(&self) -> time::Duration {
        time::Duration::from_secs(self.worker_keep_alive_secs)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be an hour between 0 and 23, got {value}")]
    InvalidHour { name: &'static str, value: u32 },
    #[error("WORKER_CORE_SIZE must be at least 1")]
    NoCoreWorkers,
    #[error("WORKER_CORE_SIZE ({core}) cannot exceed WORKER_MAX_SIZE ({max})")]
    CoreExceedsMax { core: usize, max: usize },
    #[error("WORKER_QUEUE_CAPACITY must be at least 1")]
    NoQueueCapacity,
    #[error("SENSITIVE_WORDS_MASK must be exactly one character, got {0:?}")]
    InvalidMask(String),
    #[error("unknown DEDUP_MODE {0:?}, expected check_then_set or atomic")]
    UnknownDedupMode(String),
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Checks the invariants envconfig cannot express on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("QUIET_HOURS_START_HOUR", self.quiet_hours.quiet_hours_start_hour),
            ("QUIET_HOURS_END_HOUR", self.quiet_hours.quiet_hours_end_hour),
        ] {
            if value > 23 {
                return Err(ConfigError::InvalidHour { name, value });
            }
        }

        let worker = &self.worker;
        if worker.worker_core_size == 0 {
            return Err(ConfigError::NoCoreWorkers);
        }
        if worker.worker_core_size > worker.worker_max_size {
            return Err(ConfigError::CoreExceedsMax {
                core: worker.worker_core_size,
                max: worker.worker_max_size,
            });
        }
        if worker.worker_queue_capacity == 0 {
            return Err(ConfigError::NoQueueCapacity);
        }

        self.sensitive_words.mask()?;

        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

/// How the deduplication stage talks to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupMode {
    /// `EXISTS` then `SET EX`. Two racing workers can both pass.
    CheckThenSet,
    /// A single `SET NX EX`.
    Atomic,
}

impl FromStr for DedupMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "check_then_set" => Ok(DedupMode::CheckThenSet),
            "atomic" => Ok(DedupMode::Atomic),
            _ => Err(ConfigError::UnknownDedupMode(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use test_case::test_case;

    fn config_with(vars: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::init_from_hashmap(&env).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = config_with(&[]);

        assert_eq!(config.bind(), "0.0.0.0:3310");
        assert_eq!(config.redis.redis_url, "redis://localhost:6379/");
        assert_eq!(
            config.redis.redis_response_timeout_ms.0,
            time::Duration::from_millis(100)
        );
        assert_eq!(config.kafka.kafka_consumer_topic, "notify_send_tasks");
        assert_eq!(config.dedup.dedup_expire_seconds, 300);
        assert_eq!(config.dedup.dedup_mode, DedupMode::CheckThenSet);
        assert!(config.dedup.dedup_fail_open);
        assert_eq!(config.frequency_limit.frequency_limit_day_max, 5);
        assert_eq!(config.frequency_limit.frequency_limit_hour_max, 2);
        assert_eq!(config.quiet_hours.quiet_hours_start_hour, 21);
        assert_eq!(config.quiet_hours.quiet_hours_end_hour, 8);
        assert_eq!(config.sensitive_words.mask(), Ok('*'));
        assert_eq!(config.sensitive_words.sensitive_words_path, None);
        assert_eq!(config.worker.worker_core_size, 4);
        assert_eq!(config.worker.worker_max_size, 8);
        assert_eq!(config.worker.worker_queue_capacity, 128);
        assert_eq!(config.worker.keep_alive(), time::Duration::from_secs(60));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_overrides() {
        let config = config_with(&[
            ("DEDUP_MODE", "atomic"),
            ("DEDUP_FAIL_OPEN", "false"),
            ("SENSITIVE_WORDS_MASK", "#"),
            ("SENSITIVE_WORDS_PATH", "/etc/notify/words.txt"),
        ]);

        assert_eq!(config.dedup.dedup_mode, DedupMode::Atomic);
        assert!(!config.dedup.dedup_fail_open);
        assert_eq!(config.sensitive_words.mask(), Ok('#'));
        assert_eq!(
            config.sensitive_words.sensitive_words_path.as_deref(),
            Some("/etc/notify/words.txt")
        );
    }

    #[test_case(&[("QUIET_HOURS_START_HOUR", "24")]; "start hour out of range")]
    #[test_case(&[("QUIET_HOURS_END_HOUR", "99")]; "end hour out of range")]
    #[test_case(&[("WORKER_CORE_SIZE", "0")]; "no core workers")]
    #[test_case(&[("WORKER_CORE_SIZE", "9")]; "core above max")]
    #[test_case(&[("WORKER_QUEUE_CAPACITY", "0")]; "no queue capacity")]
    #[test_case(&[("SENSITIVE_WORDS_MASK", "**")]; "multi character mask")]
    #[test_case(&[("SENSITIVE_WORDS_MASK", "")]; "empty mask")]
    fn test_validate_rejects(vars: &[(&str, &str)]) {
        assert!(config_with(vars).validate().is_err());
    }

    #[test]
    fn test_unknown_dedup_mode_fails_to_load() {
        let env: HashMap<String, String> =
            HashMap::from([("DEDUP_MODE".to_string(), "eventually".to_string())]);
        assert!(Config::init_from_hashmap(&env).is_err());
    }

    #[test]
    fn test_kafka_client_config() {
        let config = config_with(&[("KAFKA_TLS", "true")]);
        let client_config = ClientConfig::from(&config.kafka);

        assert_eq!(client_config.get("group.id"), Some("notify-worker"));
        assert_eq!(client_config.get("auto.offset.reset"), Some("latest"));
        assert_eq!(client_config.get("security.protocol"), Some("ssl"));
    }
}

use std::{path::Path, time::Duration};

use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    logging::LoggingConfig,
    network::{mqtt::MqttOptions, proxy::ProxyServerConfig, ConnectionConfig},
    pubsub::DEFAULT_LOCAL_PREFIX,
};

/// Файл настроек, читаемый по умолчанию (если существует).
pub const DEFAULT_SETTINGS_FILE: &str = "psos.toml";

/// Префикс переменных окружения: `PSOS_BROKER__HOST=...`.
pub const ENV_PREFIX: &str = "PSOS";

/// Подключение к брокеру.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// PEM-файл с корневым сертификатом. Задан: соединение идёт через TLS.
    pub ca_cert: Option<String>,
    pub keep_alive_secs: u16,
    /// Адрес `ProxyServer` другого устройства. Задан: брокер доступен только
    /// через прокси, `host`/`port` не используются.
    pub via_proxy: Option<String>,
}

/// Параметры менеджера соединения.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectionSettings {
    pub connect_attempts: u32,
    pub retry_delay_ms: u64,
    pub ping_idle_cycles: u32,
    pub poll_period_ms: u64,
    /// Таймаут одной сетевой операции транспорта.
    pub io_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RouterSettings {
    pub local_prefix: String,
}

/// Сервер LAN-прокси.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProxySettings {
    pub enabled: bool,
    pub listen: String,
    pub idle_timeout_secs: u64,
}

/// Периодическая публикация фиксированных сообщений.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PubTimerSettings {
    pub topics: Vec<String>,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default = "PubTimerSettings::default_interval_ms")]
    pub interval_ms: u64,
    /// По умолчанию равно `interval_ms`.
    #[serde(default)]
    pub initial_wait_ms: Option<u64>,
    #[serde(default = "PubTimerSettings::default_spacing_ms")]
    pub spacing_ms: u64,
}

/// Перезапуск по сообщению в топик.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResetSettings {
    pub topic: String,
    /// Файл, в который дописывается причина перезапуска.
    #[serde(default)]
    pub log_file: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServicesSettings {
    pub pub_timer: Option<PubTimerSettings>,
    pub reset: Option<ResetSettings>,
}

/// Все настройки процесса.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub connection: ConnectionSettings,
    pub router: RouterSettings,
    pub proxy: ProxySettings,
    pub services: ServicesSettings,
    pub logging: LoggingConfig,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "device".to_string());
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: format!("psos-{host}"),
            username: None,
            password: None,
            ca_cert: None,
            keep_alive_secs: 30,
            via_proxy: None,
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        let defaults = ConnectionConfig::default();
        Self {
            connect_attempts: defaults.connect_attempts,
            retry_delay_ms: defaults.retry_delay.as_millis() as u64,
            ping_idle_cycles: defaults.ping_idle_cycles,
            poll_period_ms: defaults.poll_period.as_millis() as u64,
            io_timeout_ms: 5_000,
        }
    }
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            local_prefix: DEFAULT_LOCAL_PREFIX.to_string(),
        }
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        let defaults = ProxyServerConfig::default();
        Self {
            enabled: false,
            listen: defaults.listen,
            idle_timeout_secs: defaults.idle_timeout.as_secs(),
        }
    }
}

impl PubTimerSettings {
    fn default_interval_ms() -> u64 {
        5 * 60 * 1000
    }

    fn default_spacing_ms() -> u64 {
        10
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn initial_wait(&self) -> Duration {
        Duration::from_millis(self.initial_wait_ms.unwrap_or(self.interval_ms))
    }

    pub fn spacing(&self) -> Duration {
        Duration::from_millis(self.spacing_ms)
    }
}

impl Settings {
    /// Загружает настройки из `psos.toml` (если есть) и окружения.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new(DEFAULT_SETTINGS_FILE))
    }

    /// Порядок слоёв: значения по умолчанию, файл, переменные окружения.
    /// Отсутствующий файл не является ошибкой.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let cfg = Config::builder()
            // Значения по умолчанию
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::from(path).required(false))
            // PSOS_BROKER__HOST, PSOS_SERVICES__PUB_TIMER__TOPICS=a,b
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("services.pub_timer.topics")
                    .with_list_parse_key("services.pub_timer.messages"),
            )
            .build()?;

        let settings: Settings = cfg.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.via_proxy.is_none() && self.broker.host.trim().is_empty() {
            return Err(ConfigError::invalid("broker.host", "must not be empty"));
        }
        if self.broker.client_id.is_empty() {
            return Err(ConfigError::invalid("broker.client_id", "must not be empty"));
        }
        if self.connection.connect_attempts == 0 {
            return Err(ConfigError::invalid("connection.connect_attempts", "must be at least 1"));
        }
        if self.connection.poll_period_ms == 0 {
            return Err(ConfigError::invalid("connection.poll_period_ms", "must be positive"));
        }
        if self.connection.ping_idle_cycles == 0 {
            return Err(ConfigError::invalid("connection.ping_idle_cycles", "must be at least 1"));
        }
        if self.connection.io_timeout_ms == 0 {
            return Err(ConfigError::invalid("connection.io_timeout_ms", "must be positive"));
        }
        if self.router.local_prefix.is_empty() {
            return Err(ConfigError::invalid("router.local_prefix", "must not be empty"));
        }
        if let Some(timer) = &self.services.pub_timer {
            if timer.topics.is_empty() {
                return Err(ConfigError::invalid("services.pub_timer.topics", "must not be empty"));
            }
            if timer.interval_ms == 0 {
                return Err(ConfigError::invalid("services.pub_timer.interval_ms", "must be positive"));
            }
        }
        if let Some(reset) = &self.services.reset {
            crate::pubsub::validate_filter(&reset.topic)
                .map_err(|e| ConfigError::invalid("services.reset.topic", e.to_string()))?;
        }
        self.logging.validate()
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            connect_attempts: self.connection.connect_attempts,
            retry_delay: Duration::from_millis(self.connection.retry_delay_ms),
            ping_idle_cycles: self.connection.ping_idle_cycles,
            poll_period: Duration::from_millis(self.connection.poll_period_ms),
        }
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.connection.io_timeout_ms)
    }

    pub fn mqtt_options(&self) -> MqttOptions {
        let broker = &self.broker;
        let mut options = MqttOptions::new(broker.host.clone(), broker.port, broker.client_id.clone());
        options.keep_alive = Duration::from_secs(u64::from(broker.keep_alive_secs));
        options.io_timeout = self.io_timeout();
        if let Some(username) = &broker.username {
            options = options.with_credentials(username.clone(), broker.password.clone());
        }
        options
    }

    pub fn proxy_server_config(&self) -> ProxyServerConfig {
        ProxyServerConfig {
            listen: self.proxy.listen.clone(),
            idle_timeout: Duration::from_secs(self.proxy.idle_timeout_secs),
            ..ProxyServerConfig::default()
        }
    }
}

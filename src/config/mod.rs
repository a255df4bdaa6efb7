//! Настройки процесса: значения по умолчанию, `psos.toml`, окружение `PSOS_*`.

pub mod settings;

pub use settings::{
    BrokerSettings, ConnectionSettings, ProxySettings, PubTimerSettings, ResetSettings,
    RouterSettings, ServicesSettings, Settings, DEFAULT_SETTINGS_FILE, ENV_PREFIX,
};

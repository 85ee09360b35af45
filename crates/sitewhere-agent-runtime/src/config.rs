//! Agent configuration.
//!
//! Settings arrive as loose key/value pairs (properties file, CLI flags,
//! environment) and are validated once into an immutable [`AgentConfig`].
//! Every key is accepted under its camelCase name and under the dotted
//! property name used by existing agent deployments.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use sitewhere_agent_transport::BrokerOptions;
use tracing::{info, warn};

use crate::error::{ConfigError, MissingSetting};

pub const DEFAULT_MQTT_HOSTNAME: &str = "localhost";
pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;
pub const DEFAULT_OUTBOUND_TOPIC: &str = "SiteWhere/input/protobuf";
pub const SYSTEM_TOPIC_PREFIX: &str = "SiteWhere/system/";
pub const COMMAND_TOPIC_PREFIX: &str = "SiteWhere/commands/";

/// A configuration key with its camelCase name and dotted property alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingKey {
    pub name: &'static str,
    pub property: &'static str,
}

/// All recognised setting keys.
pub mod keys {
    use super::SettingKey;

    pub const COMMAND_PROCESSOR: SettingKey = SettingKey {
        name: "commandProcessorClassname",
        property: "command.processor.classname",
    };
    pub const HARDWARE_ID: SettingKey = SettingKey {
        name: "hardwareId",
        property: "device.hardware.id",
    };
    pub const SPECIFICATION_TOKEN: SettingKey = SettingKey {
        name: "specificationToken",
        property: "device.specification.token",
    };
    pub const MQTT_HOSTNAME: SettingKey = SettingKey {
        name: "mqttHostname",
        property: "mqtt.hostname",
    };
    pub const MQTT_PORT: SettingKey = SettingKey {
        name: "mqttPort",
        property: "mqtt.port",
    };
    pub const MQTT_CLIENT_ID: SettingKey = SettingKey {
        name: "mqttClientId",
        property: "mqtt.client.id",
    };
    pub const MQTT_KEEP_ALIVE: SettingKey = SettingKey {
        name: "mqttKeepAlive",
        property: "mqtt.keepalive",
    };
    pub const OUTBOUND_TOPIC: SettingKey = SettingKey {
        name: "outboundTopic",
        property: "mqtt.outbound.sitewhere.topic",
    };
    pub const INBOUND_SYSTEM_TOPIC: SettingKey = SettingKey {
        name: "inboundSystemTopic",
        property: "mqtt.inbound.sitewhere.topic",
    };
    pub const INBOUND_COMMAND_TOPIC: SettingKey = SettingKey {
        name: "inboundCommandTopic",
        property: "mqtt.inbound.command.topic",
    };

    pub const ALL: [SettingKey; 10] = [
        COMMAND_PROCESSOR,
        HARDWARE_ID,
        SPECIFICATION_TOKEN,
        MQTT_HOSTNAME,
        MQTT_PORT,
        MQTT_CLIENT_ID,
        MQTT_KEEP_ALIVE,
        OUTBOUND_TOPIC,
        INBOUND_SYSTEM_TOPIC,
        INBOUND_COMMAND_TOPIC,
    ];
}

/// Raw, unvalidated settings.
///
/// Keys are normalised to their camelCase name on insert, so a later
/// `mqtt.port` overrides an earlier `mqttPort` and vice versa. Unknown keys
/// are kept so callers can read their own extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentSettings {
    values: BTreeMap<String, String>,
}

impl AgentSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut settings = Self::new();
        for (key, value) in pairs {
            settings.set(key.as_ref(), value);
        }
        settings
    }

    /// Parse `.properties` text: `key=value` or `key: value` per line,
    /// `#` and `!` start comments. Continuation lines are not supported.
    pub fn from_properties_str(text: &str) -> Self {
        let mut settings = Self::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (key, value) = match line.find(['=', ':']) {
                Some(idx) => (&line[..idx], &line[idx + 1..]),
                None => (line, ""),
            };
            settings.set(key.trim(), value.trim());
        }
        settings
    }

    pub fn from_properties_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_properties_str(&text))
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.values.insert(canonical_name(key).to_string(), value.into());
        self
    }

    pub fn get(&self, key: SettingKey) -> Option<&str> {
        self.values
            .get(key.name)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Look up any key, recognised or not.
    pub fn get_raw(&self, key: &str) -> Option<&str> {
        self.values.get(canonical_name(key)).map(String::as_str)
    }

    /// Overlay `other` on top of `self`.
    pub fn merge(&mut self, other: &AgentSettings) -> &mut Self {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Validate into an [`AgentConfig`].
    ///
    /// All required keys are checked before failing, so the error lists every
    /// missing setting at once.
    pub fn validate(&self) -> Result<AgentConfig, ConfigError> {
        let mut missing = Vec::new();

        let handler = self.required(
            keys::COMMAND_PROCESSOR,
            "command handler identifier",
            &mut missing,
        );
        let hardware_id = self.required(keys::HARDWARE_ID, "device hardware id", &mut missing);
        let specification_token = self.required(
            keys::SPECIFICATION_TOKEN,
            "device specification token",
            &mut missing,
        );

        let (Some(handler), Some(hardware_id), Some(specification_token)) =
            (handler, hardware_id, specification_token)
        else {
            return Err(ConfigError::MissingRequired(missing));
        };

        info!(handler = %handler, "using configured command handler");
        info!(hardware_id = %hardware_id, "using configured device hardware id");
        info!(
            specification_token = %specification_token,
            "using configured device specification token"
        );

        let hostname = self.or_default(keys::MQTT_HOSTNAME, DEFAULT_MQTT_HOSTNAME);
        let port = self.numeric_or_default(keys::MQTT_PORT, DEFAULT_MQTT_PORT);
        let keep_alive_secs =
            self.numeric_or_default(keys::MQTT_KEEP_ALIVE, DEFAULT_KEEP_ALIVE_SECS);
        let client_id = self
            .get(keys::MQTT_CLIENT_ID)
            .map(str::to_string)
            .unwrap_or_else(|| hardware_id.clone());

        let channels = ChannelBinding::derive(
            &hardware_id,
            self.get(keys::OUTBOUND_TOPIC),
            self.get(keys::INBOUND_SYSTEM_TOPIC),
            self.get(keys::INBOUND_COMMAND_TOPIC),
        );
        info!(
            outbound = %channels.outbound(),
            system = %channels.inbound_system(),
            command = %channels.inbound_command(),
            "resolved channel binding"
        );

        let broker = BrokerOptions {
            hostname,
            port,
            client_id,
            keep_alive: (keep_alive_secs > 0).then(|| Duration::from_secs(keep_alive_secs)),
            ..BrokerOptions::default()
        };

        Ok(AgentConfig {
            handler,
            identity: DeviceIdentity {
                hardware_id,
                specification_token,
            },
            broker,
            channels,
        })
    }

    fn required(
        &self,
        key: SettingKey,
        reason: &'static str,
        missing: &mut Vec<MissingSetting>,
    ) -> Option<String> {
        let value = self.get(key).map(str::to_string);
        if value.is_none() {
            missing.push(MissingSetting {
                key: key.name,
                reason,
            });
        }
        value
    }

    fn or_default(&self, key: SettingKey, default: &str) -> String {
        match self.get(key) {
            Some(value) => {
                info!(key = key.name, value = %value, "using configured setting");
                value.to_string()
            }
            None => {
                warn!(key = key.name, default = %default, "setting not specified, using default");
                default.to_string()
            }
        }
    }

    fn numeric_or_default<T>(&self, key: SettingKey, default: T) -> T
    where
        T: std::str::FromStr + std::fmt::Display + Copy,
    {
        match self.get(key) {
            Some(value) => match value.trim().parse::<T>() {
                Ok(parsed) => parsed,
                Err(_) => {
                    warn!(
                        key = key.name,
                        value = %value,
                        default = %default,
                        "non-numeric setting, using default"
                    );
                    default
                }
            },
            None => default,
        }
    }
}

fn canonical_name(key: &str) -> &str {
    keys::ALL
        .iter()
        .find(|known| known.property == key)
        .map(|known| known.name)
        .unwrap_or(key)
}

/// Validated agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Identifier of the command handler to construct.
    pub handler: String,
    pub identity: DeviceIdentity,
    pub broker: BrokerOptions,
    pub channels: ChannelBinding,
}

/// The device this agent speaks for. Fixed for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    hardware_id: String,
    specification_token: String,
}

impl DeviceIdentity {
    pub fn new(hardware_id: impl Into<String>, specification_token: impl Into<String>) -> Self {
        Self {
            hardware_id: hardware_id.into(),
            specification_token: specification_token.into(),
        }
    }

    pub fn hardware_id(&self) -> &str {
        &self.hardware_id
    }

    pub fn specification_token(&self) -> &str {
        &self.specification_token
    }
}

/// Which inbound channel a topic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundChannel {
    System,
    Command,
}

/// Outbound and inbound topics, fixed at configuration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBinding {
    outbound: String,
    inbound_system: String,
    inbound_command: String,
}

impl ChannelBinding {
    pub fn new(
        outbound: impl Into<String>,
        inbound_system: impl Into<String>,
        inbound_command: impl Into<String>,
    ) -> Self {
        Self {
            outbound: outbound.into(),
            inbound_system: inbound_system.into(),
            inbound_command: inbound_command.into(),
        }
    }

    /// Fill unset topics from the defaults for `hardware_id`.
    pub fn derive(
        hardware_id: &str,
        outbound: Option<&str>,
        inbound_system: Option<&str>,
        inbound_command: Option<&str>,
    ) -> Self {
        Self {
            outbound: outbound.unwrap_or(DEFAULT_OUTBOUND_TOPIC).to_string(),
            inbound_system: inbound_system
                .map(str::to_string)
                .unwrap_or_else(|| format!("{SYSTEM_TOPIC_PREFIX}{hardware_id}")),
            inbound_command: inbound_command
                .map(str::to_string)
                .unwrap_or_else(|| format!("{COMMAND_TOPIC_PREFIX}{hardware_id}")),
        }
    }

    pub fn outbound(&self) -> &str {
        &self.outbound
    }

    pub fn inbound_system(&self) -> &str {
        &self.inbound_system
    }

    pub fn inbound_command(&self) -> &str {
        &self.inbound_command
    }

    /// Classify an inbound topic. System wins if both topics are equal.
    pub fn classify(&self, topic: &str) -> Option<InboundChannel> {
        if topic == self.inbound_system {
            Some(InboundChannel::System)
        } else if topic == self.inbound_command {
            Some(InboundChannel::Command)
        } else {
            None
        }
    }
}

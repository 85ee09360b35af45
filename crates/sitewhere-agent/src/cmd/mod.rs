use clap::{Args, Subcommand};
use std::path::PathBuf;

use sitewhere_agent_runtime::config::keys;
use sitewhere_agent_runtime::AgentSettings;

use crate::exit::{config_error, CliResult};
use crate::output::OutputFormat;

pub mod check;
pub mod decode;
pub mod run;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to the broker and run the agent until interrupted.
    Run(RunArgs),
    /// Validate settings and print the resolved configuration.
    Check(CheckArgs),
    /// Decode a captured envelope or invocation record.
    Decode(DecodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args),
        Command::Check(args) => check::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Agent settings. Flags and environment override the properties file.
#[derive(Args, Debug, Default)]
pub struct SettingsArgs {
    /// Properties file with agent settings.
    #[arg(long, short = 'c', value_name = "FILE", env = "SITEWHERE_CONFIG")]
    pub config: Option<PathBuf>,
    /// Command handler identifier.
    #[arg(long, value_name = "NAME", env = "SITEWHERE_HANDLER")]
    pub handler: Option<String>,
    /// Device hardware id.
    #[arg(long, value_name = "ID", env = "SITEWHERE_HARDWARE_ID")]
    pub hardware_id: Option<String>,
    /// Device specification token.
    #[arg(long, value_name = "TOKEN", env = "SITEWHERE_SPECIFICATION_TOKEN")]
    pub specification_token: Option<String>,
    /// MQTT broker hostname.
    #[arg(long, value_name = "HOST", env = "SITEWHERE_MQTT_HOSTNAME")]
    pub mqtt_hostname: Option<String>,
    /// MQTT broker port.
    #[arg(long, value_name = "PORT", env = "SITEWHERE_MQTT_PORT")]
    pub mqtt_port: Option<String>,
}

impl SettingsArgs {
    pub fn load(&self) -> CliResult<AgentSettings> {
        let mut settings = match &self.config {
            Some(path) => AgentSettings::from_properties_file(path)
                .map_err(|err| config_error("cannot load settings", err))?,
            None => AgentSettings::new(),
        };

        let overrides = [
            (keys::COMMAND_PROCESSOR, &self.handler),
            (keys::HARDWARE_ID, &self.hardware_id),
            (keys::SPECIFICATION_TOKEN, &self.specification_token),
            (keys::MQTT_HOSTNAME, &self.mqtt_hostname),
            (keys::MQTT_PORT, &self.mqtt_port),
        ];
        for (key, value) in overrides {
            if let Some(value) = value {
                settings.set(key.name, value.clone());
            }
        }
        Ok(settings)
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// File holding one message payload.
    pub path: PathBuf,
    /// Decode as a platform-to-device system command.
    #[arg(long, conflicts_with = "command")]
    pub system: bool,
    /// Decode as a command-channel invocation record.
    #[arg(long, conflicts_with = "system")]
    pub command: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

use serde::Serialize;
use sitewhere_agent_runtime::{describe_signature, AgentConfig, HandlerFactory};

use crate::cmd::CheckArgs;
use crate::exit::{agent_error, config_error, CliResult, SUCCESS};
use crate::output::{print_json, print_pretty, print_table, OutputFormat};

#[derive(Serialize)]
struct CheckOutput {
    valid: bool,
    handler: String,
    operations: Vec<String>,
    hardware_id: String,
    specification_token: String,
    broker: String,
    client_id: String,
    keep_alive_secs: Option<u64>,
    outbound_topic: String,
    inbound_system_topic: String,
    inbound_command_topic: String,
}

pub fn run(args: CheckArgs, format: OutputFormat) -> CliResult<i32> {
    let settings = args.settings.load()?;
    let config = settings
        .validate()
        .map_err(|err| config_error("configuration invalid", err))?;

    let handler = HandlerFactory::default()
        .create(&config.handler)
        .map_err(|err| agent_error("configuration invalid", err))?;
    let operations = handler
        .operation_keys()
        .into_iter()
        .map(|key| format!("{}({})", key.name, describe_signature(&key.signature)))
        .collect();

    let out = check_output(&config, operations);
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_table(&rows(&out)),
        OutputFormat::Pretty => print_pretty("Agent configuration", &rows(&out)),
    }
    Ok(SUCCESS)
}

fn check_output(config: &AgentConfig, operations: Vec<String>) -> CheckOutput {
    CheckOutput {
        valid: true,
        handler: config.handler.clone(),
        operations,
        hardware_id: config.identity.hardware_id().to_string(),
        specification_token: config.identity.specification_token().to_string(),
        broker: config.broker.address(),
        client_id: config.broker.client_id.clone(),
        keep_alive_secs: config.broker.keep_alive.map(|interval| interval.as_secs()),
        outbound_topic: config.channels.outbound().to_string(),
        inbound_system_topic: config.channels.inbound_system().to_string(),
        inbound_command_topic: config.channels.inbound_command().to_string(),
    }
}

fn rows(out: &CheckOutput) -> Vec<(&'static str, String)> {
    vec![
        ("handler", out.handler.clone()),
        ("operations", out.operations.join(", ")),
        ("hardware id", out.hardware_id.clone()),
        ("specification token", out.specification_token.clone()),
        ("broker", out.broker.clone()),
        ("client id", out.client_id.clone()),
        (
            "keep alive",
            out.keep_alive_secs
                .map(|secs| format!("{secs}s"))
                .unwrap_or_else(|| "disabled".to_string()),
        ),
        ("outbound topic", out.outbound_topic.clone()),
        ("system topic", out.inbound_system_topic.clone()),
        ("command topic", out.inbound_command_topic.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use sitewhere_agent_runtime::AgentSettings;

    use super::*;

    #[test]
    fn output_reflects_derived_topics() {
        let config = AgentSettings::from_pairs([
            ("hardwareId", "dev-1"),
            ("specificationToken", "spec-A"),
            ("commandProcessorClassname", "EchoHandler"),
        ])
        .validate()
        .expect("config should validate");

        let out = check_output(&config, vec!["echo(string, originator)".to_string()]);
        assert_eq!(out.broker, "localhost:1883");
        assert_eq!(out.inbound_system_topic, "SiteWhere/system/dev-1");
        assert_eq!(out.inbound_command_topic, "SiteWhere/commands/dev-1");
        assert_eq!(rows(&out)[1].1, "echo(string, originator)");
    }
}

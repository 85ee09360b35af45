use sitewhere_agent_runtime::{Agent, ShutdownHandle};
use sitewhere_agent_transport::MqttConnector;

use crate::cmd::RunArgs;
use crate::exit::{agent_error, CliError, CliResult, INTERNAL, SUCCESS};

pub fn run(args: RunArgs) -> CliResult<i32> {
    let settings = args.settings.load()?;
    let agent =
        Agent::from_settings(&settings).map_err(|err| agent_error("invalid configuration", err))?;

    let running = agent
        .start(&MqttConnector)
        .map_err(|err| agent_error("agent start failed", err))?;
    install_ctrlc_handler(running.shutdown_handle())?;

    running.wait();
    tracing::info!("agent stopped");
    Ok(SUCCESS)
}

fn install_ctrlc_handler(shutdown: ShutdownHandle) -> CliResult<()> {
    ctrlc::set_handler(move || shutdown.trigger())
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

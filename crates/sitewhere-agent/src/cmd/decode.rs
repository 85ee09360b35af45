use serde::Serialize;
use sitewhere_agent_envelope::{
    decode_header, decode_payload, Acknowledge, CommandKind, DeviceAlert, DeviceLocation,
    DeviceMeasurements, EnvelopeError, EventKind, RegisterDevice, RegistrationAck,
    SystemCommandKind,
};
use sitewhere_agent_runtime::{describe_signature, InvocationRecord};

use crate::cmd::DecodeArgs;
use crate::exit::{agent_error, envelope_error, io_error, CliResult, SUCCESS};
use crate::output::{print_json, print_pretty, print_table, OutputFormat};

#[derive(Serialize)]
struct DecodeOutput {
    channel: &'static str,
    kind: String,
    originator: Option<String>,
    size: usize,
    payload: String,
}

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let bytes = std::fs::read(&args.path)
        .map_err(|err| io_error(&format!("cannot read {}", args.path.display()), err))?;

    let out = if args.command {
        decode_invocation(&bytes)?
    } else if args.system {
        decode_system(&bytes).map_err(|err| envelope_error("cannot decode system command", err))?
    } else {
        decode_event(&bytes).map_err(|err| envelope_error("cannot decode event", err))?
    };

    let rows = [
        ("channel", out.channel.to_string()),
        ("kind", out.kind.clone()),
        ("originator", out.originator.clone().unwrap_or_else(|| "-".to_string())),
        ("size", out.size.to_string()),
        ("payload", out.payload.clone()),
    ];
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_table(&rows),
        OutputFormat::Pretty => print_pretty("Decoded message", &rows),
    }
    Ok(SUCCESS)
}

fn decode_event(bytes: &[u8]) -> Result<DecodeOutput, EnvelopeError> {
    let (header, rest) = decode_header::<EventKind>(bytes)?;
    let payload = match header.kind {
        EventKind::Registration => format!("{:?}", decode_payload::<RegisterDevice>(rest)?),
        EventKind::Acknowledgement => format!("{:?}", decode_payload::<Acknowledge>(rest)?),
        EventKind::Location => format!("{:?}", decode_payload::<DeviceLocation>(rest)?),
        EventKind::Alert => format!("{:?}", decode_payload::<DeviceAlert>(rest)?),
        EventKind::Measurements => format!("{:?}", decode_payload::<DeviceMeasurements>(rest)?),
        EventKind::Stream | EventKind::StreamData | EventKind::RequestStreamData => {
            format!("<{} payload bytes not decoded>", rest.len())
        }
    };
    Ok(DecodeOutput {
        channel: "event",
        kind: header.kind.name().to_string(),
        originator: header.originator,
        size: bytes.len(),
        payload,
    })
}

fn decode_system(bytes: &[u8]) -> Result<DecodeOutput, EnvelopeError> {
    let (header, rest) = decode_header::<SystemCommandKind>(bytes)?;
    let payload = match header.kind {
        SystemCommandKind::RegistrationAck => {
            format!("{:?}", decode_payload::<RegistrationAck>(rest)?)
        }
        SystemCommandKind::AckDeviceStream | SystemCommandKind::ReceiveDeviceStreamData => {
            format!("<{} payload bytes not decoded>", rest.len())
        }
    };
    Ok(DecodeOutput {
        channel: "system",
        kind: header.kind.name().to_string(),
        originator: header.originator,
        size: bytes.len(),
        payload,
    })
}

fn decode_invocation(bytes: &[u8]) -> CliResult<DecodeOutput> {
    let record = InvocationRecord::decode(bytes)
        .map_err(|err| agent_error("cannot decode invocation record", err.into()))?;
    Ok(DecodeOutput {
        channel: "command",
        kind: format!(
            "{}({})",
            record.command,
            describe_signature(&record.signature())
        ),
        originator: record.originator,
        size: bytes.len(),
        payload: format!("{:?}", record.arguments),
    })
}

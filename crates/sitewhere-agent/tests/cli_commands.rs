#![cfg(feature = "cli")]

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Command, Output};

use sitewhere_agent::envelope::{encode, DeviceLocation, EventKind};
use sitewhere_agent::runtime::{ArgValue, InvocationRecord};

const SETTINGS_ENV: [&str; 6] = [
    "SITEWHERE_CONFIG",
    "SITEWHERE_HANDLER",
    "SITEWHERE_HARDWARE_ID",
    "SITEWHERE_SPECIFICATION_TOKEN",
    "SITEWHERE_MQTT_HOSTNAME",
    "SITEWHERE_MQTT_PORT",
];

fn agent(args: &[&str]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_sitewhere-agent"));
    for var in SETTINGS_ENV {
        command.env_remove(var);
    }
    command
        .arg("--log-level")
        .arg("error")
        .args(args)
        .output()
        .expect("sitewhere-agent should run")
}

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "sitewhere-agent-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

#[test]
fn version_prints_package_version() {
    let output = agent(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("sitewhere-agent {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn check_reports_every_missing_setting() {
    let output = agent(&["check", "--mqtt-hostname", "broker"]);

    assert_eq!(output.status.code(), Some(78));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("commandProcessorClassname"), "stderr: {stderr}");
    assert!(stderr.contains("hardwareId"), "stderr: {stderr}");
    assert!(stderr.contains("specificationToken"), "stderr: {stderr}");
}

#[test]
fn check_prints_resolved_configuration() {
    let output = agent(&[
        "check",
        "--format",
        "json",
        "--hardware-id",
        "dev-1",
        "--specification-token",
        "spec-A",
        "--handler",
        "EchoHandler",
    ]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let json = stdout_json(&output);
    assert_eq!(json["valid"], true);
    assert_eq!(json["broker"], "localhost:1883");
    assert_eq!(json["outbound_topic"], "SiteWhere/input/protobuf");
    assert_eq!(json["inbound_system_topic"], "SiteWhere/system/dev-1");
    assert_eq!(json["inbound_command_topic"], "SiteWhere/commands/dev-1");
    assert_eq!(json["operations"][0], "echo(string, originator)");
}

#[test]
fn check_reads_properties_file() {
    let dir = unique_temp_dir("check-file");
    let path = dir.join("agent.properties");
    std::fs::write(
        &path,
        "command.processor.classname=ExampleHandler\n\
         device.hardware.id=dev-9\n\
         device.specification.token=spec-B\n\
         mqtt.port=not-a-port\n",
    )
    .expect("properties should be writable");

    let config = path.to_string_lossy().to_string();
    let output = agent(&["check", "--format", "json", "--config", &config]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let json = stdout_json(&output);
    assert_eq!(json["handler"], "ExampleHandler");
    assert_eq!(json["broker"], "localhost:1883");
    assert_eq!(json["client_id"], "dev-9");
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn check_rejects_unknown_handler() {
    let output = agent(&[
        "check",
        "--hardware-id",
        "dev-1",
        "--specification-token",
        "spec-A",
        "--handler",
        "com.example.Missing",
    ]);
    assert_eq!(output.status.code(), Some(78));
    assert!(String::from_utf8_lossy(&output.stderr).contains("com.example.Missing"));
}

#[test]
fn decode_event_and_invocation_files() {
    let dir = unique_temp_dir("decode");

    let location = DeviceLocation {
        hardware_id: "dev-1".to_string(),
        latitude: 33.755,
        longitude: -84.39,
        elevation: Some(333.0),
        event_date: None,
    };
    let event_path = dir.join("location.bin");
    std::fs::write(
        &event_path,
        encode(EventKind::Location, None, &location).expect("envelope should encode"),
    )
    .expect("event file should be writable");

    let event = event_path.to_string_lossy().to_string();
    let output = agent(&["decode", "--format", "json", &event]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let json = stdout_json(&output);
    assert_eq!(json["kind"], "LOCATION");
    assert!(json["originator"].is_null());

    let record = InvocationRecord::new("echo", vec![ArgValue::from("hi")]).with_originator("cmd-1");
    let record_path = dir.join("echo.msgpack");
    std::fs::write(&record_path, record.encode().expect("record should encode"))
        .expect("record file should be writable");

    let command = record_path.to_string_lossy().to_string();
    let output = agent(&["decode", "--format", "json", "--command", &command]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let json = stdout_json(&output);
    assert_eq!(json["kind"], "echo(string)");
    assert_eq!(json["originator"], "cmd-1");

    let output = agent(&["decode", "--system", &command]);
    assert_eq!(output.status.code(), Some(60));

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn run_fails_fast_when_broker_is_unreachable() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("ephemeral port should bind");
        listener
            .local_addr()
            .expect("listener should have an address")
            .port()
    };

    let output = agent(&[
        "run",
        "--hardware-id",
        "dev-1",
        "--specification-token",
        "spec-A",
        "--handler",
        "EchoHandler",
        "--mqtt-hostname",
        "127.0.0.1",
        "--mqtt-port",
        &port.to_string(),
    ]);

    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("agent start failed"));
}

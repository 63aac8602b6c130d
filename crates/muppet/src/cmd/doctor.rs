use std::sync::Arc;
use std::time::Duration;

use muppet_peer::{connect, ChannelConfig, ChannelError, MemoryNetwork, PeerChannel};
use muppet_proto::{decode_message, encode_message, MessageBuilder, DEFAULT_MAX_MESSAGE_SIZE};
use muppet_signal::MemoryRelay;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::cmd::{parse_duration, DoctorArgs};
use crate::exit::{CliError, CliResult, HEALTH_CHECK_FAILED, INTERNAL, SUCCESS};
use crate::output::OutputFormat;

const ROOM: &str = "doctor:loopback";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Info,
    Skip,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            detail: detail.into(),
        }
    }

    fn from_outcome(name: &str, outcome: Result<String, String>) -> Self {
        match outcome {
            Ok(detail) => Self::new(name, CheckStatus::Pass, detail),
            Err(detail) => Self::new(name, CheckStatus::Fail, detail),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(args: DoctorArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime setup failed: {err}")))?;

    let mut checks = vec![envelope_codec_check()];
    checks.extend(runtime.block_on(loopback_checks(timeout)));
    checks.push(compiled_features_check());

    let has_fail = checks.iter().any(|c| c.status == CheckStatus::Fail);
    let output = DoctorOutput {
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    };

    print_doctor(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn envelope_codec_check() -> CheckResult {
    let message = MessageBuilder::new("doctor").broadcast("PING", json!({"n": 1}));
    let outcome = encode_message(&message, DEFAULT_MAX_MESSAGE_SIZE)
        .and_then(|text| decode_message(text.as_bytes(), DEFAULT_MAX_MESSAGE_SIZE))
        .map_err(|err| err.to_string())
        .and_then(|decoded| {
            if decoded == message {
                Ok(format!("{} survives encode/decode", decoded.event_class))
            } else {
                Err("decoded envelope differs from the original".to_string())
            }
        });
    CheckResult::from_outcome("envelope_codec", outcome)
}

async fn loopback_checks(timeout: Duration) -> Vec<CheckResult> {
    let relay = MemoryRelay::new();
    let network = MemoryNetwork::new();

    let pair = open_pair(&relay, &network, timeout).await;
    let (left, right) = match pair {
        Ok(pair) => pair,
        Err(detail) => {
            let mut checks = vec![CheckResult::new("loopback_open", CheckStatus::Fail, detail)];
            for name in ["broadcast", "request_response", "request_timeout", "close"] {
                checks.push(CheckResult::new(
                    name,
                    CheckStatus::Skip,
                    "loopback channel did not open",
                ));
            }
            return checks;
        }
    };

    vec![
        CheckResult::new(
            "loopback_open",
            CheckStatus::Pass,
            format!("{} and {} connected in {ROOM}", left.client_name(), right.client_name()),
        ),
        CheckResult::from_outcome("broadcast", broadcast_check(&left, &right, timeout).await),
        CheckResult::from_outcome("request_response", request_check(&left, &right, timeout).await),
        CheckResult::from_outcome("request_timeout", timeout_check(&left).await),
        CheckResult::from_outcome("close", close_check(&left, &right, timeout).await),
    ]
}

async fn open_pair(
    relay: &MemoryRelay,
    network: &MemoryNetwork,
    timeout: Duration,
) -> Result<(PeerChannel, PeerChannel), String> {
    let factory = Arc::new(network.clone());
    let left = connect(relay, Arc::clone(&factory), ROOM, &ChannelConfig::new("left", "memory"))
        .await
        .map_err(|err| err.to_string())?;
    wait_for(timeout, || relay.room_size(ROOM) == 1).await?;
    let right = connect(relay, factory, ROOM, &ChannelConfig::new("right", "memory"))
        .await
        .map_err(|err| err.to_string())?;
    wait_for(timeout, || left.is_open() && right.is_open()).await?;
    Ok((left, right))
}

async fn broadcast_check(
    left: &PeerChannel,
    right: &PeerChannel,
    timeout: Duration,
) -> Result<String, String> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    right.on("left.PING", move |_, msg| {
        let _ = tx.send(msg.event.clone());
    });
    if !left.send("PING", json!({"n": 1})) {
        return Err("send returned false on an open channel".to_string());
    }
    match tokio::time::timeout(timeout, rx.recv()).await {
        Ok(Some(event)) if event == json!({"n": 1}) => Ok("left.PING delivered".to_string()),
        Ok(Some(event)) => Err(format!("unexpected payload {event}")),
        Ok(None) | Err(_) => Err(format!("no delivery within {timeout:?}")),
    }
}

async fn request_check(
    left: &PeerChannel,
    right: &PeerChannel,
    timeout: Duration,
) -> Result<String, String> {
    right.on("left.ECHO", |ch, msg| {
        ch.respond(msg, "ECHO_RESULT", msg.event.clone());
    });
    let response = left
        .request_with_timeout("ECHO", json!("hello"), "right", timeout)
        .await
        .map_err(|err| err.to_string())?;
    if response.event == json!("hello") {
        Ok(format!("{} correlated", response.event_class))
    } else {
        Err(format!("unexpected response payload {}", response.event))
    }
}

async fn timeout_check(left: &PeerChannel) -> Result<String, String> {
    let deadline = Duration::from_millis(50);
    match left
        .request_with_timeout("UNANSWERED", json!({}), "right", deadline)
        .await
    {
        Err(ChannelError::RequestTimeout(_)) if left.pending_requests() == 0 => {
            Ok(format!("rejected after {deadline:?}"))
        }
        Err(ChannelError::RequestTimeout(_)) => Err("timed-out request still pending".to_string()),
        Err(err) => Err(format!("unexpected error: {err}")),
        Ok(msg) => Err(format!("unexpected response {}", msg.event_class)),
    }
}

async fn close_check(
    left: &PeerChannel,
    right: &PeerChannel,
    timeout: Duration,
) -> Result<String, String> {
    left.close();
    left.close();
    wait_for(timeout, || !right.is_open()).await?;
    Ok("peer observed close".to_string())
}

async fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> Result<(), String> {
    let waited = tokio::time::timeout(timeout, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    waited.map_err(|_| format!("timed out after {timeout:?}"))
}

fn compiled_features_check() -> CheckResult {
    let mut features = Vec::new();
    if cfg!(feature = "peer") {
        features.push("peer");
    }
    if cfg!(feature = "net") {
        features.push("net");
    }
    if cfg!(feature = "cli") {
        features.push("cli");
    }

    CheckResult::new("compiled_features", CheckStatus::Info, features.join(", "))
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("muppet doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<18} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => {
            println!("{}", output.overall);
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Info => "INFO",
        CheckStatus::Skip => "SKIP",
    }
}

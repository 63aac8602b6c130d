use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use muppet_proto::MuppetMessage;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    room: Option<&'a str>,
    message: &'a MuppetMessage,
    size: usize,
    timestamp: String,
}

/// Print one envelope. `room` is included when the message came off a channel.
pub fn print_message(message: &MuppetMessage, room: Option<&str>, format: OutputFormat) {
    let wire = serde_json::to_string(message).unwrap_or_else(|_| "{}".to_string());
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                room,
                message,
                size: wire.len(),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT CLASS", "DESTINATION", "REQUEST ID", "ID", "EVENT"])
                .add_row(vec![
                    message.event_class.clone(),
                    message.destination.clone(),
                    message.request_id.clone().unwrap_or_else(|| "-".to_string()),
                    message.id.clone(),
                    message.event.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{}eventClass={} destination={} requestId={} id={} event={}",
                room.map(|r| format!("room={r} ")).unwrap_or_default(),
                message.event_class,
                message.destination,
                message.request_id.as_deref().unwrap_or("-"),
                message.id,
                message.event
            );
        }
        OutputFormat::Raw => {
            print_raw(wire.as_bytes());
            println!();
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

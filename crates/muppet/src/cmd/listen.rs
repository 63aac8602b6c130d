use std::sync::Arc;
use std::time::Duration;

use muppet_peer::{connect, ChannelConfig, PeerChannel, RtcTransportFactory};
use muppet_signal::WebSocketConnector;
use tokio::sync::mpsc;

use crate::cmd::{parse_duration, ListenArgs, RelayArgs};
use crate::exit::{channel_error, CliError, CliResult, INTERNAL, SUCCESS, TIMEOUT};
use crate::output::{print_message, OutputFormat};

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let runtime = runtime()?;
    runtime.block_on(listen(args, format))
}

async fn listen(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let channel = open_channel(&args.relay).await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    channel.on(args.event_class.clone(), move |_, msg| {
        let _ = tx.send(msg.clone());
    });

    let mut printed = 0usize;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(room = channel.room(), "interrupted");
                break;
            }
            message = rx.recv() => {
                let Some(message) = message else { break };
                print_message(&message, Some(channel.room()), format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
        }
    }

    channel.close();
    Ok(SUCCESS)
}

/// Join `relay.room` over the websocket relay and wait for the data channel.
pub(crate) async fn open_channel(relay: &RelayArgs) -> CliResult<PeerChannel> {
    let open_timeout = parse_duration(&relay.open_timeout)?;
    let mut config =
        ChannelConfig::new(relay.client.clone(), relay.server.clone()).with_server_path(&relay.server_path);
    if !relay.ice_servers.is_empty() {
        config = config.with_ice_servers(relay.ice_servers.iter().cloned());
    }

    let channel = connect(
        &WebSocketConnector::new(),
        Arc::new(RtcTransportFactory::new()),
        &relay.room,
        &config,
    )
    .await
    .map_err(|err| channel_error("connect failed", err))?;
    tracing::info!(room = %relay.room, client = %relay.client, "waiting for peer");

    let opened = tokio::time::timeout(open_timeout, async {
        while !channel.is_open() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    if opened.is_err() {
        channel.close();
        return Err(CliError::new(
            TIMEOUT,
            format!("no peer joined {} within {open_timeout:?}", relay.room),
        ));
    }
    Ok(channel)
}

pub(crate) fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime setup failed: {err}")))
}

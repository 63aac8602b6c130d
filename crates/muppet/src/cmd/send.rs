use crate::cmd::listen::{open_channel, runtime};
use crate::cmd::{parse_duration, parse_payload, SendArgs};
use crate::exit::{channel_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let event = parse_payload(&args.json)?;
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let runtime = runtime()?;

    runtime.block_on(async move {
        let channel = open_channel(&args.relay).await?;

        let result = if args.wait {
            channel
                .request_with_timeout(&args.event_class, event, &args.destination, wait_timeout)
                .await
                .map(|response| print_message(&response, Some(channel.room()), format))
                .map_err(|err| channel_error("request failed", err))
        } else if channel.send_to(&args.event_class, event, &args.destination, None) {
            Ok(())
        } else {
            Err(CliError::new(FAILURE, "send failed"))
        };

        // Let the data channel drain before tearing it down.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        channel.close();
        result.map(|()| SUCCESS)
    })
}

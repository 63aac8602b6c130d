use std::io::Read;

use muppet_proto::decode_message;

use crate::cmd::DecodeArgs;
use crate::exit::{io_error, proto_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let frame = match args.frame {
        Some(frame) => frame.into_bytes(),
        None => read_stdin()?,
    };
    let frame = trim_line_ending(&frame);

    let message =
        decode_message(frame, args.max_size).map_err(|err| proto_error("decode failed", err))?;
    tracing::debug!(id = %message.id, event_class = %message.event_class, "decoded envelope");

    print_message(&message, None, format);
    Ok(SUCCESS)
}

fn read_stdin() -> CliResult<Vec<u8>> {
    let mut buf = Vec::new();
    std::io::stdin()
        .read_to_end(&mut buf)
        .map_err(|err| io_error("failed reading stdin", err))?;
    Ok(buf)
}

fn trim_line_ending(frame: &[u8]) -> &[u8] {
    let end = frame
        .iter()
        .rposition(|b| !matches!(b, b'\n' | b'\r'))
        .map_or(0, |pos| pos + 1);
    &frame[..end]
}

use muppet_proto::{encode_message, MessageBuilder, DEFAULT_MAX_MESSAGE_SIZE};

use crate::cmd::{parse_payload, EnvelopeArgs};
use crate::exit::{proto_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub fn run(args: EnvelopeArgs, format: OutputFormat) -> CliResult<i32> {
    let event = parse_payload(&args.json)?;
    let message = MessageBuilder::new(args.client).build(
        &args.event_class,
        event,
        &args.destination,
        args.request_id.as_deref(),
    );

    // Reject envelopes a peer would refuse to decode.
    encode_message(&message, DEFAULT_MAX_MESSAGE_SIZE)
        .map_err(|err| proto_error("encode failed", err))?;

    print_message(&message, None, format);
    Ok(SUCCESS)
}

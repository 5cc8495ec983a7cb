//! End-to-end exercise of the tutoring stream protocol: producer frames on
//! one side, incremental parser on the other, with awkward chunking in
//! between.

use futures::{stream, StreamExt};

use coursepilot_api::error::CoreError;
use coursepilot_api::services::chat_service::frame_token_stream;
use coursepilot_api::services::generation::TokenStream;
use coursepilot_api::utils::stream::{decode_frame, SseParser, StreamFrame};

fn tokens(items: Vec<Result<String, CoreError>>) -> TokenStream {
    Box::pin(stream::iter(items))
}

fn wire_encode(payloads: &[String]) -> Vec<u8> {
    payloads
        .iter()
        .flat_map(|p| format!("data: {}\n\n", p).into_bytes())
        .collect()
}

/// Full round trip: tokens with embedded newlines survive framing, transit
/// in arbitrary chunk sizes, and reassemble byte for byte.
#[tokio::test]
async fn tokens_survive_framing_and_awkward_chunking() {
    let payloads: Vec<String> = frame_token_stream(tokens(vec![
        Ok("Ownership ".to_string()),
        Ok("rules:\n1. one owner".to_string()),
        Ok("\r\n2. moves".to_string()),
    ]))
    .collect()
    .await;

    let wire = wire_encode(&payloads);

    // Feed the wire bytes three bytes at a time.
    let mut parser = SseParser::new();
    let mut reply = String::new();
    let mut done = false;
    for chunk in wire.chunks(3) {
        for payload in parser.push(chunk) {
            match decode_frame(&payload) {
                StreamFrame::Token(text) => reply.push_str(&text),
                StreamFrame::Done => done = true,
                StreamFrame::Error(e) => panic!("unexpected error frame: {}", e),
            }
        }
    }

    assert!(done);
    assert_eq!(parser.pending(), 0);
    assert_eq!(reply, "Ownership rules:\n1. one owner\r\n2. moves");
}

/// A mid-stream failure surfaces as exactly one error frame, and the stream
/// still terminates with the done marker.
#[tokio::test]
async fn midstream_error_becomes_an_error_frame() {
    let payloads: Vec<String> = frame_token_stream(tokens(vec![
        Ok("partial answer".to_string()),
        Err(CoreError::UpstreamGeneration("overloaded".to_string())),
    ]))
    .collect()
    .await;

    let wire = wire_encode(&payloads);
    let mut parser = SseParser::new();
    let mut frames = Vec::new();
    for payload in parser.push(&wire) {
        frames.push(decode_frame(&payload));
    }

    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0], StreamFrame::Token("partial answer".to_string()));
    assert!(matches!(&frames[1], StreamFrame::Error(msg) if msg.contains("overloaded")));
    assert_eq!(frames[2], StreamFrame::Done);
}

/// Tokens that look like protocol frames stay literal text: only the exact
/// done marker and JSON objects with an `error` field are special.
#[tokio::test]
async fn protocol_lookalike_tokens_stay_literal() {
    let payloads: Vec<String> = frame_token_stream(tokens(vec![
        Ok("{\"note\": \"not an error\"}".to_string()),
        Ok("almost [DONE] but not".to_string()),
    ]))
    .collect()
    .await;

    assert_eq!(
        decode_frame(&payloads[0]),
        StreamFrame::Token("{\"note\": \"not an error\"}".to_string())
    );
    assert_eq!(
        decode_frame(&payloads[1]),
        StreamFrame::Token("almost [DONE] but not".to_string())
    );
    assert_eq!(decode_frame(&payloads[2]), StreamFrame::Done);
}

/// Disconnecting mid-stream: complete frames already received stay usable,
/// the buffered tail is discarded with the parser.
#[tokio::test]
async fn client_disconnect_keeps_complete_frames() {
    let payloads: Vec<String> = frame_token_stream(tokens(vec![
        Ok("first ".to_string()),
        Ok("second ".to_string()),
        Ok("third".to_string()),
    ]))
    .collect()
    .await;

    let wire = wire_encode(&payloads);
    let cutoff = wire.len() - 10;

    let mut parser = SseParser::new();
    let mut reply = String::new();
    for payload in parser.push(&wire[..cutoff]) {
        if let StreamFrame::Token(text) = decode_frame(&payload) {
            reply.push_str(&text);
        }
    }

    assert!(reply.starts_with("first "));
    assert!(parser.pending() > 0);
}

//! SSE frame parsing shared by provider clients that read a streaming HTTP
//! response body: buffers raw bytes across read boundaries and yields complete
//! `\n\n`-terminated frames, either as a bare `data:` payload or as an
//! `(event, data)` pair for vendors that name their events.

use futures_util::{Stream, StreamExt};

fn split_frame(frame: &str) -> (Option<String>, Option<String>) {
    let mut event = None;
    let mut data = None;
    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data = Some(rest.trim().to_string());
        }
    }
    (event, data)
}

/// Yields the JSON text of each `data:` line, skipping frames with an empty
/// payload. Suitable for vendors (OpenAI) that don't name their SSE events.
pub fn sse_lines(
    byte_stream: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
) -> impl Stream<Item = String> + Send {
    let state = (Box::pin(byte_stream), String::new());
    futures_util::stream::unfold(state, |(mut stream, mut buffer)| async move {
        loop {
            if let Some(pos) = buffer.find("\n\n") {
                let frame: String = buffer.drain(..pos + 2).collect();
                if let (_, Some(data)) = split_frame(&frame) {
                    if !data.is_empty() {
                        return Some((data, (stream, buffer)));
                    }
                }
                continue;
            }
            match stream.next().await {
                Some(Ok(bytes)) => buffer.push_str(&String::from_utf8_lossy(&bytes)),
                Some(Err(_)) | None => return None,
            }
        }
    })
}

/// Yields `(event_name, parsed_json_data)` pairs, for vendors (Anthropic) whose
/// SSE frames carry an explicit `event:` line alongside `data:`. Frames without a
/// recognisable event/data pair, or whose data doesn't parse as JSON, are
/// dropped.
pub fn sse_event_frames(
    byte_stream: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
) -> impl Stream<Item = (String, serde_json::Value)> + Send {
    let state = (Box::pin(byte_stream), String::new());
    futures_util::stream::unfold(state, |(mut stream, mut buffer)| async move {
        loop {
            if let Some(pos) = buffer.find("\n\n") {
                let frame: String = buffer.drain(..pos + 2).collect();
                if let (Some(event), Some(data)) = split_frame(&frame) {
                    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&data) {
                        return Some(((event, parsed), (stream, buffer)));
                    }
                }
                continue;
            }
            match stream.next().await {
                Some(Ok(bytes)) => buffer.push_str(&String::from_utf8_lossy(&bytes)),
                Some(Err(_)) | None => return None,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[tokio::test]
    async fn splits_named_events_across_reads() {
        let raw = vec![
            Ok(bytes::Bytes::from_static(b"event: message_start\ndata: {\"a\":1}\n\n")),
            Ok(bytes::Bytes::from_static(b"event: content_block_delta\ndata: {\"a\":2}\n\n")),
        ];
        let frames: Vec<_> = sse_event_frames(stream::iter(raw)).collect::<Vec<_>>().await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].0, "message_start");
        assert_eq!(frames[1].0, "content_block_delta");
    }
}

use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

#[derive(Debug, Serialize, Deserialize)]
pub struct DapMessage {
    pub seq: u64,
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(flatten)]
    pub content: DapMessageContent,
}

/// Untagged, so variants are tried in order. `Request` stays last: its fields
/// are a subset of `Response`'s.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DapMessageContent {
    Response {
        request_seq: u64,
        success: bool,
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
    },
    Event {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
    },
    Request {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments: Option<Value>,
    },
}

const CONTENT_LENGTH: &str = "Content-Length:";

/// Reads one `Content-Length` framed message. `Ok(None)` at end of stream.
pub fn read_message<R: BufRead + ?Sized>(reader: &mut R) -> Result<Option<DapMessage>, ProtocolError> {
    let mut length = None;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header)? == 0 {
            return Ok(None);
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some(value) = header.strip_prefix(CONTENT_LENGTH) {
            let value = value.trim();
            length = Some(
                value
                    .parse::<usize>()
                    .map_err(|_| ProtocolError::InvalidLength(value.to_string()))?,
            );
        }
    }

    let length = length.ok_or(ProtocolError::MissingLength)?;
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body)?;
    Ok(Some(serde_json::from_slice(&body)?))
}

/// Writes `msg` with its `Content-Length` header and flushes.
pub fn write_message<W: Write + ?Sized>(writer: &mut W, msg: &DapMessage) -> Result<(), ProtocolError> {
    let json = serde_json::to_vec(msg)?;
    write!(writer, "{CONTENT_LENGTH} {}\r\n\r\n", json.len())?;
    writer.write_all(&json)?;
    writer.flush()?;
    Ok(())
}

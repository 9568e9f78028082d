//! Wire framing for the exchange protocol.
//!
//! Every frame starts with a one-byte message type. Strings are
//! `(u16 length, utf-8 bytes)`; payloads are `(u32 length, raw bytes)`.
//! All integers are big-endian.

use sdn_core::{validate_schema_name, SdnError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// ── Message type bytes ───────────────────────────────────────────────────────

pub const MSG_REQUEST_DATA: u8 = 0x01;
pub const MSG_PUSH_DATA: u8 = 0x02;
pub const MSG_QUERY: u8 = 0x03;

pub const RESP_REJECT: u8 = 0x00;
pub const RESP_ACCEPT: u8 = 0x01;
pub const RESP_RATE_LIMITED: u8 = 0x02;

// ── Limits ───────────────────────────────────────────────────────────────────

/// Wire limits enforced while decoding. A length prefix exceeding its limit
/// rejects the frame before any allocation of that size.
#[derive(Clone, Copy, Debug)]
pub struct FrameLimits {
    pub max_message: usize,
    pub max_schema_name: usize,
    pub max_query: usize,
    pub max_query_rows: usize,
    pub max_query_bytes: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_message: sdn_core::MAX_MESSAGE_BYTES,
            max_schema_name: sdn_core::MAX_SCHEMA_NAME_BYTES,
            max_query: sdn_core::MAX_QUERY_BYTES,
            max_query_rows: sdn_core::MAX_QUERY_ROWS,
            max_query_bytes: sdn_core::MAX_QUERY_RESULT_BYTES,
        }
    }
}

// ── Request / Response ───────────────────────────────────────────────────────

/// A decoded client request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// `0x01` — fetch one record by (schema, CID string).
    RequestData { schema: String, cid: String },
    /// `0x02` — push one record payload for validation and storage.
    PushData { schema: String, payload: Vec<u8> },
    /// `0x03` — bounded query. The opaque bytes are read for protocol
    /// compatibility and discarded by the engine.
    Query { schema: String, query: Vec<u8> },
}

/// A server response ready for encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Reject,
    RateLimited,
    /// `ACCEPT | u32 len | bytes` — answer to `RequestData`.
    Blob(Vec<u8>),
    /// `ACCEPT | string` — answer to `PushData` (the CID).
    CidString(String),
    /// `ACCEPT | u32 count | (u32 len, bytes)×count` — answer to `Query`.
    Rows(Vec<Vec<u8>>),
}

// ── Field primitives ─────────────────────────────────────────────────────────

async fn read_string<R: AsyncRead + Unpin>(
    io: &mut R,
    max_len: usize,
) -> Result<String, SdnError> {
    let len = io.read_u16().await? as usize;
    if len > max_len {
        return Err(SdnError::MessageTooLarge {
            got: len,
            max: max_len,
        });
    }
    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|_| SdnError::InvalidRequest("string is not utf-8".into()))
}

async fn read_payload<R: AsyncRead + Unpin>(
    io: &mut R,
    max_len: usize,
) -> Result<Vec<u8>, SdnError> {
    let len = io.read_u32().await? as usize;
    if len > max_len {
        return Err(SdnError::MessageTooLarge {
            got: len,
            max: max_len,
        });
    }
    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;
    Ok(buf)
}

fn put_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u16).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn put_payload(out: &mut Vec<u8>, p: &[u8]) {
    out.extend_from_slice(&(p.len() as u32).to_be_bytes());
    out.extend_from_slice(p);
}

// ── Request codec ────────────────────────────────────────────────────────────

/// Read one request frame, enforcing limits and the schema-name predicate.
pub async fn read_request<R: AsyncRead + Unpin>(
    io: &mut R,
    limits: &FrameLimits,
) -> Result<Request, SdnError> {
    let msg_type = io.read_u8().await?;
    match msg_type {
        MSG_REQUEST_DATA => {
            let schema = read_string(io, limits.max_schema_name).await?;
            validate_schema_name(&schema)?;
            let cid = read_string(io, limits.max_schema_name).await?;
            Ok(Request::RequestData { schema, cid })
        }
        MSG_PUSH_DATA => {
            let schema = read_string(io, limits.max_schema_name).await?;
            validate_schema_name(&schema)?;
            let payload = read_payload(io, limits.max_message).await?;
            Ok(Request::PushData { schema, payload })
        }
        MSG_QUERY => {
            let schema = read_string(io, limits.max_schema_name).await?;
            validate_schema_name(&schema)?;
            let query = read_payload(io, limits.max_query).await?;
            Ok(Request::Query { schema, query })
        }
        other => Err(SdnError::InvalidRequest(format!(
            "unknown message type 0x{other:02x}"
        ))),
    }
}

/// Encode a request frame (client side).
pub fn encode_request(request: &Request) -> Vec<u8> {
    let mut out = Vec::new();
    match request {
        Request::RequestData { schema, cid } => {
            out.push(MSG_REQUEST_DATA);
            put_string(&mut out, schema);
            put_string(&mut out, cid);
        }
        Request::PushData { schema, payload } => {
            out.push(MSG_PUSH_DATA);
            put_string(&mut out, schema);
            put_payload(&mut out, payload);
        }
        Request::Query { schema, query } => {
            out.push(MSG_QUERY);
            put_string(&mut out, schema);
            put_payload(&mut out, query);
        }
    }
    out
}

// ── Response codec ───────────────────────────────────────────────────────────

/// Encode a response frame (server side).
pub fn encode_response(response: &Response) -> Vec<u8> {
    let mut out = Vec::new();
    match response {
        Response::Reject => out.push(RESP_REJECT),
        Response::RateLimited => out.push(RESP_RATE_LIMITED),
        Response::Blob(bytes) => {
            out.push(RESP_ACCEPT);
            put_payload(&mut out, bytes);
        }
        Response::CidString(cid) => {
            out.push(RESP_ACCEPT);
            put_string(&mut out, cid);
        }
        Response::Rows(rows) => {
            out.push(RESP_ACCEPT);
            out.extend_from_slice(&(rows.len() as u32).to_be_bytes());
            for row in rows {
                put_payload(&mut out, row);
            }
        }
    }
    out
}

/// Write a response frame and flush.
pub async fn write_response<W: AsyncWrite + Unpin>(
    io: &mut W,
    response: &Response,
) -> Result<(), SdnError> {
    io.write_all(&encode_response(response)).await?;
    io.flush().await?;
    Ok(())
}

/// Client side: read a `RequestData` answer.
pub async fn read_blob_response<R: AsyncRead + Unpin>(
    io: &mut R,
    limits: &FrameLimits,
) -> Result<Response, SdnError> {
    match io.read_u8().await? {
        RESP_REJECT => Ok(Response::Reject),
        RESP_RATE_LIMITED => Ok(Response::RateLimited),
        RESP_ACCEPT => Ok(Response::Blob(read_payload(io, limits.max_message).await?)),
        other => Err(SdnError::InvalidRequest(format!(
            "unknown response byte 0x{other:02x}"
        ))),
    }
}

/// Client side: read a `PushData` answer.
pub async fn read_cid_response<R: AsyncRead + Unpin>(
    io: &mut R,
    limits: &FrameLimits,
) -> Result<Response, SdnError> {
    match io.read_u8().await? {
        RESP_REJECT => Ok(Response::Reject),
        RESP_RATE_LIMITED => Ok(Response::RateLimited),
        RESP_ACCEPT => Ok(Response::CidString(
            read_string(io, limits.max_schema_name).await?,
        )),
        other => Err(SdnError::InvalidRequest(format!(
            "unknown response byte 0x{other:02x}"
        ))),
    }
}

/// Client side: read a `Query` answer.
pub async fn read_rows_response<R: AsyncRead + Unpin>(
    io: &mut R,
    limits: &FrameLimits,
) -> Result<Response, SdnError> {
    match io.read_u8().await? {
        RESP_REJECT => Ok(Response::Reject),
        RESP_RATE_LIMITED => Ok(Response::RateLimited),
        RESP_ACCEPT => {
            let count = io.read_u32().await? as usize;
            if count > limits.max_query_rows {
                return Err(SdnError::MessageTooLarge {
                    got: count,
                    max: limits.max_query_rows,
                });
            }
            let mut rows = Vec::with_capacity(count);
            for _ in 0..count {
                rows.push(read_payload(io, limits.max_message).await?);
            }
            Ok(Response::Rows(rows))
        }
        other => Err(SdnError::InvalidRequest(format!(
            "unknown response byte 0x{other:02x}"
        ))),
    }
}

//! Store file format parser using nom
//!
//! File format:
//! ```text
//! PGST001\n
//! [version: u32]
//! [row_count: u32]
//! ...frames...
//! ```
//!
//! Frame format (all integers little-endian):
//! ```text
//! [kind: u8][body_len: u32][body]
//!
//! upsert body: tag, last_active i64, last_hidden i64, scroll_position i32,
//!              scroll_offset i32, page_index u32, format_version u32,
//!              schema, payload
//! delete body: tag
//! ```
//! Strings are `u16` length-prefixed UTF-8. The payload is a presence byte
//! followed by a `u32` length-prefixed blob.

use nom::{
    bytes::complete::tag as magic,
    combinator::{all_consuming, map_res},
    error::ErrorKind,
    multi::length_data,
    number::complete::{le_i32, le_i64, le_u16, le_u32, le_u8},
    sequence::tuple,
    IResult,
};

use crate::error::{Error, Result};
use crate::record::PageRecord;

/// Magic header for store files
pub const STORE_MAGIC: &[u8] = b"PGST001\n";

/// Length of the file header in bytes
pub const HEADER_LEN: usize = STORE_MAGIC.len() + 8;

/// Current file format version
pub const FORMAT_VERSION: u32 = 1;

/// Length of the `kind` + `body_len` prefix of every frame
pub const FRAME_PREFIX_LEN: usize = 5;

const FRAME_UPSERT: u8 = 1;
const FRAME_DELETE: u8 = 2;

/// Store file header
#[derive(Debug, Clone, PartialEq)]
pub struct StoreHeader {
    /// File format version
    pub version: u32,
    /// Number of live rows when the file was last closed
    pub row_count: u32,
}

/// One entry of the append-only log
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Insert or replace a record
    Upsert(PageRecord),
    /// Remove a tag
    Delete(String),
}

/// Parse the store file header
pub fn parse_header(input: &[u8]) -> Result<StoreHeader> {
    if input.len() < HEADER_LEN {
        return Err(Error::Parse("Input too short for header".to_string()));
    }

    let parsed: IResult<&[u8], (&[u8], u32, u32)> = tuple((magic(STORE_MAGIC), le_u32, le_u32))(input);
    match parsed {
        Ok((_, (_, version, row_count))) => Ok(StoreHeader { version, row_count }),
        Err(_) => Err(Error::Parse("Invalid store magic header".to_string())),
    }
}

/// Create a store file header
pub fn create_header(version: u32, row_count: u32) -> Vec<u8> {
    let mut header = Vec::with_capacity(HEADER_LEN);
    header.extend_from_slice(STORE_MAGIC);
    header.extend_from_slice(&version.to_le_bytes());
    header.extend_from_slice(&row_count.to_le_bytes());
    header
}

fn short_string(input: &[u8]) -> IResult<&[u8], String> {
    map_res(length_data(le_u16), |bytes: &[u8]| {
        std::str::from_utf8(bytes).map(str::to_owned)
    })(input)
}

fn payload(input: &[u8]) -> IResult<&[u8], Option<Vec<u8>>> {
    let (input, present) = le_u8(input)?;
    if present == 0 {
        return Ok((input, None));
    }
    let (input, bytes) = length_data(le_u32)(input)?;
    Ok((input, Some(bytes.to_vec())))
}

/// Parse the body of an upsert frame
pub fn parse_record(input: &[u8]) -> IResult<&[u8], PageRecord> {
    let (input, (tag, last_active, last_hidden, scroll_position, scroll_offset, page_index, format_version, schema, payload)) =
        tuple((
            short_string,
            le_i64,
            le_i64,
            le_i32,
            le_i32,
            le_u32,
            le_u32,
            short_string,
            payload,
        ))(input)?;

    Ok((
        input,
        PageRecord {
            tag,
            payload,
            schema,
            format_version,
            scroll_position,
            scroll_offset,
            page_index,
            last_active,
            last_hidden,
        },
    ))
}

/// Parse one complete frame
pub fn parse_frame(input: &[u8]) -> IResult<&[u8], Frame> {
    let (rest, kind) = le_u8(input)?;
    let (rest, body) = length_data(le_u32)(rest)?;

    let frame = match kind {
        FRAME_UPSERT => {
            let (_, record) = all_consuming(parse_record)(body)?;
            Frame::Upsert(record)
        }
        FRAME_DELETE => {
            let (_, tag) = all_consuming(short_string)(body)?;
            Frame::Delete(tag)
        }
        _ => {
            return Err(nom::Err::Failure(nom::error::Error::new(input, ErrorKind::Tag)));
        }
    };

    Ok((rest, frame))
}

fn put_short_string(buf: &mut Vec<u8>, value: &str) -> Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| Error::ValueTooLarge(value.len()))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

fn frame(kind: u8, body: Vec<u8>) -> Result<Vec<u8>> {
    let len = u32::try_from(body.len()).map_err(|_| Error::ValueTooLarge(body.len()))?;
    let mut out = Vec::with_capacity(FRAME_PREFIX_LEN + body.len());
    out.push(kind);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Encode an upsert frame for `record`
pub fn encode_upsert(record: &PageRecord) -> Result<Vec<u8>> {
    let payload_len = record.payload.as_ref().map_or(0, Vec::len);
    let mut body = Vec::with_capacity(64 + record.tag.len() + record.schema.len() + payload_len);

    put_short_string(&mut body, &record.tag)?;
    body.extend_from_slice(&record.last_active.to_le_bytes());
    body.extend_from_slice(&record.last_hidden.to_le_bytes());
    body.extend_from_slice(&record.scroll_position.to_le_bytes());
    body.extend_from_slice(&record.scroll_offset.to_le_bytes());
    body.extend_from_slice(&record.page_index.to_le_bytes());
    body.extend_from_slice(&record.format_version.to_le_bytes());
    put_short_string(&mut body, &record.schema)?;

    match &record.payload {
        Some(bytes) => {
            let len = u32::try_from(bytes.len()).map_err(|_| Error::ValueTooLarge(bytes.len()))?;
            body.push(1);
            body.extend_from_slice(&len.to_le_bytes());
            body.extend_from_slice(bytes);
        }
        None => body.push(0),
    }

    frame(FRAME_UPSERT, body)
}

/// Encode a delete frame for `tag`
pub fn encode_delete(tag: &str) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(2 + tag.len());
    put_short_string(&mut body, tag)?;
    frame(FRAME_DELETE, body)
}

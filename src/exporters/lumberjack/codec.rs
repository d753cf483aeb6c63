// SPDX-License-Identifier: Apache-2.0

//! Lumberjack v1 framing. All integers are big-endian.
//!
//! A page goes on the wire as a window frame announcing the event count
//! followed by one compressed frame holding a zlib stream of data frames.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::{self, Read, Write};

use crate::exporters::lumberjack::ExporterError;
use crate::topology::payload::{EventPage, FileEvent};

pub const WINDOW_FRAME: &[u8; 2] = b"1W";
pub const COMPRESSED_FRAME: &[u8; 2] = b"1C";
pub const DATA_FRAME: &[u8; 2] = b"1D";
pub const ACK_LEN: usize = 6;

const COMPRESSION_LEVEL: u32 = 3;

/// A page encoded for the wire, ready to be written as is.
#[derive(Clone, Debug)]
pub struct Payload {
    events: u32,
    wire: Bytes,
}

impl Payload {
    pub fn events(&self) -> u32 {
        self.events
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.wire
    }
}

/// Encode `page`, numbering its events from `first_sequence`.
pub fn encode_page(
    page: &EventPage,
    first_sequence: u32,
    host: &str,
) -> Result<Payload, ExporterError> {
    let mut frames = BytesMut::with_capacity(page.len() * 256);
    let mut sequence = first_sequence;
    for event in &page.events {
        write_data_frame(&mut frames, sequence, event, host);
        sequence = sequence.wrapping_add(1);
    }

    let compressed = compress(&frames).map_err(ExporterError::Compression)?;
    let events = page.len() as u32;

    let mut wire = BytesMut::with_capacity(compressed.len() + 12);
    wire.put_slice(WINDOW_FRAME);
    wire.put_u32(events);
    wire.put_slice(COMPRESSED_FRAME);
    wire.put_u32(compressed.len() as u32);
    wire.put_slice(&compressed);

    Ok(Payload {
        events,
        wire: wire.freeze(),
    })
}

pub fn write_data_frame(buf: &mut BytesMut, sequence: u32, event: &FileEvent, host: &str) {
    let offset = event.offset.to_string();

    buf.put_slice(DATA_FRAME);
    buf.put_u32(sequence);
    buf.put_u32(4 + event.fields.len() as u32);
    put_pair(buf, "file", event.source.as_bytes());
    put_pair(buf, "host", host.as_bytes());
    put_pair(buf, "offset", offset.as_bytes());
    put_pair(buf, "line", &event.text);
    for (key, value) in &event.fields {
        put_pair(buf, key, value.as_bytes());
    }
}

fn put_pair(buf: &mut BytesMut, key: &str, value: &[u8]) {
    buf.put_u32(key.len() as u32);
    buf.put_slice(key.as_bytes());
    buf.put_u32(value.len() as u32);
    buf.put_slice(value);
}

fn compress(frames: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(
        Vec::with_capacity(frames.len() / 2),
        Compression::new(COMPRESSION_LEVEL),
    );
    encoder.write_all(frames)?;
    encoder.finish()
}

/// One decoded data frame.
#[derive(Clone, Debug, PartialEq)]
pub struct DataFrame {
    pub sequence: u32,
    pub pairs: Vec<(String, Bytes)>,
}

impl DataFrame {
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_ref())
    }
}

/// Inflate the body of a compressed frame and split it into data frames.
pub fn decode_compressed(compressed: &[u8]) -> io::Result<Vec<DataFrame>> {
    let mut raw = Vec::new();
    ZlibDecoder::new(compressed).read_to_end(&mut raw)?;
    decode_data_frames(Bytes::from(raw))
}

pub fn decode_data_frames(mut buf: Bytes) -> io::Result<Vec<DataFrame>> {
    let mut frames = Vec::new();
    while buf.has_remaining() {
        let tag = take(&mut buf, 2)?;
        if tag.as_ref() != DATA_FRAME {
            return Err(invalid(format!("unexpected frame type {:?}", tag)));
        }
        let sequence = take_u32(&mut buf)?;
        let count = take_u32(&mut buf)?;

        let mut pairs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let key_len = take_u32(&mut buf)? as usize;
            let key = take(&mut buf, key_len)?;
            let key = String::from_utf8(key.to_vec()).map_err(|e| invalid(e.to_string()))?;
            let value_len = take_u32(&mut buf)? as usize;
            pairs.push((key, take(&mut buf, value_len)?));
        }
        frames.push(DataFrame { sequence, pairs });
    }
    Ok(frames)
}

fn take(buf: &mut Bytes, len: usize) -> io::Result<Bytes> {
    if buf.remaining() < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "truncated data frame",
        ));
    }
    Ok(buf.split_to(len))
}

fn take_u32(buf: &mut Bytes) -> io::Result<u32> {
    Ok(take(buf, 4)?.get_u32())
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::payload::test::event;

    fn split_wire(wire: &[u8]) -> (u32, &[u8]) {
        assert_eq!(&wire[0..2], WINDOW_FRAME);
        let window = u32::from_be_bytes(wire[2..6].try_into().unwrap());
        assert_eq!(&wire[6..8], COMPRESSED_FRAME);
        let len = u32::from_be_bytes(wire[8..12].try_into().unwrap()) as usize;
        assert_eq!(wire.len(), 12 + len);
        (window, &wire[12..])
    }

    #[test]
    fn test_data_frame_layout() {
        let mut buf = BytesMut::new();
        write_data_frame(&mut buf, 7, &event("/a", 12, "hi"), "h");

        let mut expected = BytesMut::new();
        expected.put_slice(b"1D");
        expected.put_u32(7);
        expected.put_u32(5);
        for (k, v) in [
            ("file", "/a"),
            ("host", "h"),
            ("offset", "12"),
            ("line", "hi"),
            ("rotated", "false"),
        ] {
            expected.put_u32(k.len() as u32);
            expected.put_slice(k.as_bytes());
            expected.put_u32(v.len() as u32);
            expected.put_slice(v.as_bytes());
        }
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_page_survives_compression() {
        let events: Vec<_> = (0..50)
            .map(|i| event("/tmp/app.log", i * 10, &format!("line number {}", i)))
            .collect();
        let page = EventPage::new(events);

        let payload = encode_page(&page, 100, "web-1").unwrap();
        assert_eq!(payload.events(), 50);

        let (window, compressed) = split_wire(payload.as_bytes());
        assert_eq!(window, 50);

        let frames = decode_compressed(compressed).unwrap();
        assert_eq!(frames.len(), 50);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.sequence, 100 + i as u32);
            assert_eq!(frame.pairs[0].0, "file");
            assert_eq!(frame.pairs[1].0, "host");
            assert_eq!(frame.pairs[2].0, "offset");
            assert_eq!(frame.pairs[3].0, "line");
            assert_eq!(frame.get("host"), Some(&b"web-1"[..]));
            assert_eq!(frame.get("offset"), Some((i * 10).to_string().as_bytes()));
            assert_eq!(
                frame.get("line"),
                Some(format!("line number {}", i).as_bytes())
            );
        }
    }

    #[test]
    fn test_sequence_wraps() {
        let page = EventPage::new(vec![event("/a", 0, "x"), event("/a", 2, "y")]);
        let payload = encode_page(&page, u32::MAX, "h").unwrap();
        let (_, compressed) = split_wire(payload.as_bytes());

        let frames = decode_compressed(compressed).unwrap();
        assert_eq!(frames[0].sequence, u32::MAX);
        assert_eq!(frames[1].sequence, 0);
    }

    #[test]
    fn test_truncated_frame_is_rejected() {
        let mut buf = BytesMut::new();
        write_data_frame(&mut buf, 1, &event("/a", 0, "x"), "h");
        let truncated = buf.freeze().slice(0..20);
        assert!(decode_data_frames(truncated).is_err());
    }
}

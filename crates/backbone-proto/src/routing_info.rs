//! Routing-info TLV list (part of C1, §4.1/§3).
//!
//! Each entry is `tag(1) | length(1) | value(length)`, terminated by a
//! `tag=0x00, length=0x00` pair. Three tags are recognized today; an
//! implementation encountering an unrecognized tag stops and reports
//! `MalformedRoutingInfo` rather than silently skipping it, since a future
//! tag with an unexpected length-encoding could desync the rest of the list.

use bytes::{Buf, BufMut, BytesMut};

const TAG_TERMINATOR: u8 = 0x00;
const TAG_VIA_PATH: u8 = 0x01;
const TAG_SERVICE: u8 = 0x02;
const TAG_COST: u8 = 0x03;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RoutingInfoError {
    #[error("routing-info TLV truncated: need {need} more bytes")]
    Truncated { need: usize },
    #[error("unrecognized routing-info tag {0:#04x}")]
    UnknownTag(u8),
    #[error("cost TLV must be exactly 2 bytes, got {0}")]
    BadCostLength(u8),
    #[error("via-path entry is not valid UTF-8")]
    NonUtf8Callsign,
}

/// One routing-info annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingAnnotation {
    /// Ordered list of callsigns this packet has traversed, joined by `,`
    /// on the wire (matches the AX.25 digipeat path's textual convention).
    ViaPath(Vec<String>),
    /// A service name offered or requested along this path.
    Service(String),
    /// Cumulative routing cost accrued so far.
    Cost(u16),
}

/// The ordered list of annotations attached to a packet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoutingInfo {
    pub annotations: Vec<RoutingAnnotation>,
}

impl RoutingInfo {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        for a in &self.annotations {
            match a {
                RoutingAnnotation::ViaPath(path) => {
                    let joined = path.join(",");
                    let bytes = joined.as_bytes();
                    buf.put_u8(TAG_VIA_PATH);
                    buf.put_u8(bytes.len() as u8);
                    buf.put_slice(bytes);
                }
                RoutingAnnotation::Service(name) => {
                    let bytes = name.as_bytes();
                    buf.put_u8(TAG_SERVICE);
                    buf.put_u8(bytes.len() as u8);
                    buf.put_slice(bytes);
                }
                RoutingAnnotation::Cost(cost) => {
                    buf.put_u8(TAG_COST);
                    buf.put_u8(2);
                    buf.put_u16(*cost);
                }
            }
        }
        buf.put_u8(TAG_TERMINATOR);
        buf.put_u8(0);
        buf
    }

    /// Decode a TLV list starting at the front of `data`. Returns the
    /// parsed list and the number of bytes consumed (including the
    /// terminator), so the caller can advance past it to find the payload.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), RoutingInfoError> {
        let mut cursor = data;
        let mut consumed = 0usize;
        let mut annotations = Vec::new();

        loop {
            if cursor.remaining() < 2 {
                return Err(RoutingInfoError::Truncated {
                    need: 2 - cursor.remaining(),
                });
            }
            let tag = cursor[0];
            let len = cursor[1] as usize;
            cursor.advance(2);
            consumed += 2;

            if tag == TAG_TERMINATOR && len == 0 {
                break;
            }

            if cursor.remaining() < len {
                return Err(RoutingInfoError::Truncated {
                    need: len - cursor.remaining(),
                });
            }
            let value = &cursor[..len];

            let annotation = match tag {
                TAG_VIA_PATH => {
                    let s = std::str::from_utf8(value)
                        .map_err(|_| RoutingInfoError::NonUtf8Callsign)?;
                    let path = if s.is_empty() {
                        Vec::new()
                    } else {
                        s.split(',').map(|p| p.to_string()).collect()
                    };
                    RoutingAnnotation::ViaPath(path)
                }
                TAG_SERVICE => {
                    let s = std::str::from_utf8(value)
                        .map_err(|_| RoutingInfoError::NonUtf8Callsign)?;
                    RoutingAnnotation::Service(s.to_string())
                }
                TAG_COST => {
                    if len != 2 {
                        return Err(RoutingInfoError::BadCostLength(len as u8));
                    }
                    RoutingAnnotation::Cost(u16::from_be_bytes([value[0], value[1]]))
                }
                other => return Err(RoutingInfoError::UnknownTag(other)),
            };
            annotations.push(annotation);

            cursor.advance(len);
            consumed += len;
        }

        Ok((RoutingInfo { annotations }, consumed))
    }
}

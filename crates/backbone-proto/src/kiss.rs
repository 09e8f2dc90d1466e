//! KISS frame de-escaper (C3).
//!
//! RF byte streams are delimited by `FEND` with byte-stuffing for `FEND`
//! and `FESC` occurring inside a frame. This module only unwraps framing;
//! it knows nothing about AX.25 or the backbone wire format above it.

use bytes::BytesMut;

pub const FEND: u8 = 0xC0;
pub const FESC: u8 = 0xDB;
pub const TFEND: u8 = 0xDC;
pub const TFESC: u8 = 0xDD;

/// Frames larger than this without a closing `FEND` are flushed as a raw
/// (non-KISS) AX.25 frame, for TNCs that omit KISS framing entirely.
pub const RAW_FLUSH_CEILING: usize = 1024;

/// Per-connection KISS de-escaping state.
#[derive(Debug, Default)]
pub struct KissDecoder {
    buf: BytesMut,
    in_frame: bool,
    pending_escape: bool,
}

impl KissDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly-received bytes; returns every complete frame extracted
    /// from the stream so far, in order. A leading control byte with value
    /// `<= 0x1F` (the KISS command/port nibble) is stripped from each frame.
    pub fn feed(&mut self, input: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        for &byte in input {
            match byte {
                FEND => {
                    if self.in_frame && !self.buf.is_empty() {
                        frames.push(self.take_frame());
                    }
                    self.in_frame = true;
                    self.pending_escape = false;
                }
                FESC if self.in_frame => {
                    self.pending_escape = true;
                }
                TFEND if self.in_frame && self.pending_escape => {
                    self.buf.extend_from_slice(&[FEND]);
                    self.pending_escape = false;
                }
                TFESC if self.in_frame && self.pending_escape => {
                    self.buf.extend_from_slice(&[FESC]);
                    self.pending_escape = false;
                }
                other if self.in_frame => {
                    self.pending_escape = false;
                    self.buf.extend_from_slice(&[other]);
                    if self.buf.len() >= RAW_FLUSH_CEILING {
                        frames.push(self.take_frame());
                        self.in_frame = false;
                    }
                }
                _ => {
                    // byte received outside any FEND-delimited frame; some
                    // TNCs omit KISS framing, so accumulate it too and let
                    // the ceiling flush a raw frame.
                    self.buf.extend_from_slice(&[byte]);
                    if self.buf.len() >= RAW_FLUSH_CEILING {
                        frames.push(self.take_frame());
                    }
                }
            }
        }
        frames
    }

    fn take_frame(&mut self) -> Vec<u8> {
        let mut frame = std::mem::take(&mut self.buf).to_vec();
        if let Some(&first) = frame.first() {
            if first <= 0x1F {
                frame.remove(0);
            }
        }
        frame
    }
}

/// Escape a raw frame for transmission: wrap in `FEND`s and byte-stuff any
/// `FEND`/`FESC` occurrences within the payload.
pub fn encode_frame(command_byte: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.push(FEND);
    out.push(command_byte);
    for &b in payload {
        match b {
            FEND => {
                out.push(FESC);
                out.push(TFEND);
            }
            FESC => {
                out.push(FESC);
                out.push(TFESC);
            }
            other => out.push(other),
        }
    }
    out.push(FEND);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_frame_round_trips() {
        let payload = vec![0x01, 0x02, FEND, FESC, 0x03];
        let wire = encode_frame(0x00, &payload);
        let mut dec = KissDecoder::new();
        let frames = dec.feed(&wire);
        assert_eq!(frames, vec![payload]);
    }

    #[test]
    fn strips_leading_command_byte() {
        let wire = encode_frame(0x00, &[0xAA, 0xBB]);
        let mut dec = KissDecoder::new();
        let frames = dec.feed(&wire);
        assert_eq!(frames, vec![vec![0xAA, 0xBB]]);
    }

    #[test]
    fn two_frames_in_one_feed() {
        let a = encode_frame(0x00, &[1, 2, 3]);
        let b = encode_frame(0x00, &[4, 5, 6]);
        let mut combined = a;
        combined.extend_from_slice(&b);
        let mut dec = KissDecoder::new();
        let frames = dec.feed(&combined);
        assert_eq!(frames, vec![vec![1, 2, 3], vec![4, 5, 6]]);
    }

    #[test]
    fn feed_can_be_called_incrementally() {
        let wire = encode_frame(0x00, &[9, 9, 9]);
        let mut dec = KissDecoder::new();
        let mut frames = dec.feed(&wire[..2]);
        assert!(frames.is_empty());
        frames.extend(dec.feed(&wire[2..]));
        assert_eq!(frames, vec![vec![9, 9, 9]]);
    }

    #[test]
    fn raw_stream_without_fend_flushes_at_ceiling() {
        let raw = vec![0x42u8; RAW_FLUSH_CEILING];
        let mut dec = KissDecoder::new();
        let frames = dec.feed(&raw);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), RAW_FLUSH_CEILING);
    }
}

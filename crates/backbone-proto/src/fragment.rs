//! Fragmentation and reassembly (C14).
//!
//! Only engaged when a payload exceeds `mtu - overhead`. Each fragment
//! carries a 32-byte header: `messageId(16) | fragmentNum(4) |
//! totalFragments(4) | payloadLen(4) | checksum(4)`. The checksum guards
//! against a corrupted fragment slipping past transport-level framing; it
//! is not a cryptographic digest, so it is computed with a small FNV-1a
//! hash rather than pulling in an MD5 crate for a 4-byte integrity tag.

use std::time::{Duration, Instant};

use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const FRAGMENT_HEADER_LEN: usize = 32;

/// Per-message overhead budgeted against the carrying transport's MTU.
pub const HEADER_OVERHEAD: usize = 32;

/// How long a reassembly buffer waits for missing fragments before giving up.
pub const REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FragmentError {
    #[error("fragment header truncated: need {need} bytes")]
    Truncated { need: usize },
    #[error("fragment checksum mismatch")]
    ChecksumMismatch,
    #[error("fragmentNum {fragment_num} out of range for totalFragments {total}")]
    IndexOutOfRange { fragment_num: u32, total: u32 },
    #[error("fragment belongs to a different reassembly (messageId mismatch)")]
    MessageIdMismatch,
    #[error("totalFragments changed mid-reassembly")]
    TotalFragmentsChanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub message_id: [u8; 16],
    pub fragment_num: u32,
    pub total_fragments: u32,
    pub payload: Bytes,
}

impl Fragment {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(FRAGMENT_HEADER_LEN + self.payload.len());
        buf.put_slice(&self.message_id);
        buf.put_u32(self.fragment_num);
        buf.put_u32(self.total_fragments);
        buf.put_u32(self.payload.len() as u32);
        buf.put_u32(fnv1a(&self.payload));
        buf.put_slice(&self.payload);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, FragmentError> {
        if data.len() < FRAGMENT_HEADER_LEN {
            return Err(FragmentError::Truncated {
                need: FRAGMENT_HEADER_LEN - data.len(),
            });
        }
        let mut message_id = [0u8; 16];
        message_id.copy_from_slice(&data[0..16]);
        let mut cursor = &data[16..];
        let fragment_num = cursor.get_u32();
        let total_fragments = cursor.get_u32();
        let payload_len = cursor.get_u32() as usize;
        let checksum = cursor.get_u32();

        if fragment_num >= total_fragments {
            return Err(FragmentError::IndexOutOfRange {
                fragment_num,
                total: total_fragments,
            });
        }
        let need = FRAGMENT_HEADER_LEN + payload_len;
        if data.len() < need {
            return Err(FragmentError::Truncated {
                need: need - data.len(),
            });
        }
        let payload = Bytes::copy_from_slice(&data[FRAGMENT_HEADER_LEN..need]);
        if fnv1a(&payload) != checksum {
            return Err(FragmentError::ChecksumMismatch);
        }

        Ok(Fragment {
            message_id,
            fragment_num,
            total_fragments,
            payload,
        })
    }
}

/// Split `bytes` into fragments no larger than `mtu - HEADER_OVERHEAD` each.
/// Returns a single one-fragment vec unchanged if no split is needed by the
/// caller's own threshold check; this function always fragments when asked.
pub fn fragment(message_id: [u8; 16], bytes: &[u8], mtu: usize) -> Vec<Fragment> {
    let chunk_size = mtu.saturating_sub(HEADER_OVERHEAD).max(1);
    let chunks: Vec<&[u8]> = bytes.chunks(chunk_size).collect();
    let total = chunks.len().max(1) as u32;
    if bytes.is_empty() {
        return vec![Fragment {
            message_id,
            fragment_num: 0,
            total_fragments: 1,
            payload: Bytes::new(),
        }];
    }
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| Fragment {
            message_id,
            fragment_num: i as u32,
            total_fragments: total,
            payload: Bytes::copy_from_slice(chunk),
        })
        .collect()
}

/// Accumulates fragments for one in-flight message.
pub struct ReassemblyBuffer {
    message_id: [u8; 16],
    total_fragments: u32,
    slots: Vec<Option<Bytes>>,
    received_count: usize,
    started_at: Instant,
    last_update_at: Instant,
}

impl ReassemblyBuffer {
    pub fn new(first: &Fragment, now: Instant) -> Self {
        let mut slots = vec![None; first.total_fragments as usize];
        slots[first.fragment_num as usize] = Some(first.payload.clone());
        ReassemblyBuffer {
            message_id: first.message_id,
            total_fragments: first.total_fragments,
            slots,
            received_count: 1,
            started_at: now,
            last_update_at: now,
        }
    }

    pub fn add(&mut self, fragment: &Fragment, now: Instant) -> Result<(), FragmentError> {
        if fragment.message_id != self.message_id {
            return Err(FragmentError::MessageIdMismatch);
        }
        if fragment.total_fragments != self.total_fragments {
            return Err(FragmentError::TotalFragmentsChanged);
        }
        let idx = fragment.fragment_num as usize;
        if self.slots[idx].is_none() {
            self.slots[idx] = Some(fragment.payload.clone());
            self.received_count += 1;
        }
        self.last_update_at = now;
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.received_count == self.slots.len()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.started_at) >= REASSEMBLY_TIMEOUT
    }

    /// Concatenate all fragment payloads in order. Panics if incomplete;
    /// callers must check [`Self::is_complete`] first.
    pub fn reassemble(&self) -> Bytes {
        assert!(self.is_complete(), "reassembly attempted while incomplete");
        let mut out = BytesMut::new();
        for slot in &self.slots {
            out.extend_from_slice(slot.as_ref().expect("checked complete"));
        }
        out.freeze()
    }

    /// Indices of fragments not yet received, for upper layers to request
    /// selective retransmission.
    pub fn missing_indices(&self) -> Vec<u32> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(i, _)| i as u32)
            .collect()
    }

    pub fn last_update_at(&self) -> Instant {
        self.last_update_at
    }
}

fn fnv1a(data: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c9dc5;
    const PRIME: u32 = 0x01000193;
    let mut hash = OFFSET_BASIS;
    for &b in data {
        hash ^= b as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble_all(fragments: &[Fragment]) -> Bytes {
        let now = Instant::now();
        let mut buf = ReassemblyBuffer::new(&fragments[0], now);
        for f in &fragments[1..] {
            buf.add(f, now).unwrap();
        }
        assert!(buf.is_complete());
        buf.reassemble()
    }

    #[test]
    fn i9_fragmentation_round_trip_arbitrary_mtu() {
        for mtu in [64usize, 100, 200, 8192] {
            let data = vec![0xABu8; 5000];
            let fragments = fragment([1; 16], &data, mtu);
            let reassembled = reassemble_all(&fragments);
            assert_eq!(&reassembled[..], &data[..]);
        }
    }

    #[test]
    fn single_fragment_when_small() {
        let data = b"hello";
        let fragments = fragment([2; 16], data, 8192);
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].total_fragments, 1);
    }

    #[test]
    fn empty_payload_yields_one_empty_fragment() {
        let fragments = fragment([3; 16], &[], 200);
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].payload.is_empty());
    }

    #[test]
    fn fragment_wire_round_trip() {
        let f = Fragment {
            message_id: [9; 16],
            fragment_num: 2,
            total_fragments: 5,
            payload: Bytes::from_static(b"chunk"),
        };
        let encoded = f.encode();
        let decoded = Fragment::decode(&encoded).unwrap();
        assert_eq!(decoded, f);
    }

    #[test]
    fn decode_rejects_checksum_mismatch() {
        let f = Fragment {
            message_id: [9; 16],
            fragment_num: 0,
            total_fragments: 1,
            payload: Bytes::from_static(b"chunk"),
        };
        let mut encoded = f.encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert_eq!(Fragment::decode(&encoded), Err(FragmentError::ChecksumMismatch));
    }

    #[test]
    fn missing_indices_reports_unfilled_slots() {
        let data = vec![0u8; 600];
        let fragments = fragment([4; 16], &data, 200);
        assert!(fragments.len() >= 3);
        let now = Instant::now();
        let mut buf = ReassemblyBuffer::new(&fragments[0], now);
        let missing_before = buf.missing_indices();
        assert!(!missing_before.is_empty());
        for f in &fragments[1..] {
            buf.add(f, now).unwrap();
        }
        assert!(buf.missing_indices().is_empty());
        assert!(buf.is_complete());
    }

    #[test]
    fn expires_after_timeout() {
        let data = vec![0u8; 600];
        let fragments = fragment([5; 16], &data, 200);
        let t0 = Instant::now();
        let buf = ReassemblyBuffer::new(&fragments[0], t0);
        assert!(!buf.is_expired(t0));
        assert!(buf.is_expired(t0 + REASSEMBLY_TIMEOUT + Duration::from_secs(1)));
    }
}

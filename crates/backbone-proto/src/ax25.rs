//! AX.25 address fields and WIDE-N-M path servicing (C2).
//!
//! Each AX.25 address field is 7 bytes: 6 ASCII characters (space-padded)
//! shifted left by one bit, followed by an SSID byte whose bit0 is the
//! "extension" (EA) flag, bits 1-4 hold the numeric SSID, and bit7 is the
//! "has-been-repeated" (H) flag. A `WIDEn-m` digipeater alias is written
//! in the base-callsign field as the literal text `WIDEn` with `m` stored
//! in the SSID nibble.

use backbone_common::callsign::MAX_SSID;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Ax25Error {
    #[error("address field must be exactly 7 bytes, got {0}")]
    WrongFieldLength(usize),
    #[error("address base is not valid ASCII text")]
    NonAsciiBase,
    #[error("no path entry found")]
    NoMatchingEntry,
}

/// A single decoded AX.25 address field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ax25Address {
    /// Space-trimmed base text, e.g. `"WIDE2"` or `"W1ABC"`.
    pub base: [u8; 6],
    pub base_len: usize,
    pub ssid: u8,
    pub has_been_repeated: bool,
    pub extension: bool,
}

impl Ax25Address {
    /// Decode one 7-byte shifted-ASCII address field.
    pub fn decode(field: &[u8]) -> Result<Self, Ax25Error> {
        if field.len() != 7 {
            return Err(Ax25Error::WrongFieldLength(field.len()));
        }
        let mut base = [0u8; 6];
        let mut base_len = 0;
        for (i, &b) in field[..6].iter().enumerate() {
            let unshifted = b >> 1;
            if unshifted != b' ' {
                base[i] = unshifted;
                base_len = i + 1;
            } else {
                base[i] = b' ';
            }
        }
        // trim trailing spaces without counting them toward base_len
        while base_len > 0 && base[base_len - 1] == b' ' {
            base_len -= 1;
        }
        if !base[..base_len].iter().all(|b| b.is_ascii_graphic()) {
            return Err(Ax25Error::NonAsciiBase);
        }
        let ssid_byte = field[6];
        Ok(Ax25Address {
            base,
            base_len,
            ssid: (ssid_byte >> 1) & 0x0F,
            has_been_repeated: ssid_byte & 0x80 != 0,
            extension: ssid_byte & 0x01 != 0,
        })
    }

    /// Re-encode this address field back to its 7-byte wire form.
    pub fn encode(&self) -> [u8; 7] {
        let mut field = [0u8; 7];
        for i in 0..6 {
            let c = if i < self.base_len { self.base[i] } else { b' ' };
            field[i] = c << 1;
        }
        let mut ssid_byte = (self.ssid & 0x0F) << 1;
        if self.has_been_repeated {
            ssid_byte |= 0x80;
        }
        if self.extension {
            ssid_byte |= 0x01;
        }
        field[6] = ssid_byte;
        field
    }

    pub fn base_str(&self) -> &str {
        std::str::from_utf8(&self.base[..self.base_len]).unwrap_or("")
    }

    /// Parse a `WIDEn` base into its numeric `n`, if this address is one.
    pub fn wide_n(&self) -> Option<u8> {
        let s = self.base_str();
        let suffix = s.strip_prefix("WIDE")?;
        suffix.parse().ok()
    }
}

/// Policy governing which WIDE entries this node services as a digipeater.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigipeaterRole {
    /// Services only `WIDE1-*`.
    FillIn,
    /// Services `WIDEk-*` for `k >= 2`, up to `max_wide_n`.
    Wide,
    /// Services no WIDE entries at all.
    None,
}

/// Locate the first unmarked address in `path` matching the digipeater
/// policy, decrement its remaining hop count, and set its H-bit.
///
/// Returns the mutated path and the index that was serviced, or
/// `Ax25Error::NoMatchingEntry` if nothing in the path qualifies.
pub fn service_path(
    path: &mut [Ax25Address],
    role: DigipeaterRole,
    max_wide_n: u8,
) -> Result<usize, Ax25Error> {
    for (idx, addr) in path.iter_mut().enumerate() {
        if addr.has_been_repeated {
            continue;
        }
        let Some(n) = addr.wide_n() else { continue };

        let eligible = match role {
            DigipeaterRole::None => false,
            DigipeaterRole::FillIn => n == 1,
            DigipeaterRole::Wide => n >= 2 && n <= max_wide_n,
        };
        if !eligible {
            continue;
        }

        if addr.ssid > 0 {
            addr.ssid -= 1;
        }
        addr.has_been_repeated = true;
        return Ok(idx);
    }
    Err(Ax25Error::NoMatchingEntry)
}

/// `true` if servicing `path` under `role`/`max_wide_n` would be blocked
/// purely because the WIDE value exceeds `max_wide_n` (used to increment
/// the `maxWideBlocked` counter distinctly from "nothing to service").
pub fn blocked_by_max_wide(path: &[Ax25Address], role: DigipeaterRole, max_wide_n: u8) -> bool {
    if !matches!(role, DigipeaterRole::Wide) {
        return false;
    }
    path.iter().any(|addr| {
        !addr.has_been_repeated
            && addr
                .wide_n()
                .map(|n| n >= 2 && n > max_wide_n)
                .unwrap_or(false)
    })
}

/// Build a `WIDEn-m` address for use in tests and outgoing path construction.
pub fn wide_address(n: u8, m: u8) -> Ax25Address {
    debug_assert!(m <= MAX_SSID);
    let text = format!("WIDE{n}");
    let bytes = text.as_bytes();
    let mut base = [b' '; 6];
    base[..bytes.len()].copy_from_slice(bytes);
    Ax25Address {
        base,
        base_len: bytes.len(),
        ssid: m,
        has_been_repeated: false,
        extension: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_round_trips_through_wire_form() {
        let addr = wide_address(2, 2);
        let encoded = addr.encode();
        let decoded = Ax25Address::decode(&encoded).unwrap();
        assert_eq!(decoded.base_str(), "WIDE2");
        assert_eq!(decoded.ssid, 2);
        assert!(!decoded.has_been_repeated);
    }

    #[test]
    fn i3_wide2_2_digipeat_decrements_and_sets_h_bit() {
        let mut path = [wide_address(2, 2)];
        let idx = service_path(&mut path, DigipeaterRole::Wide, 2).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(path[0].ssid, 1);
        assert!(path[0].has_been_repeated);
    }

    #[test]
    fn servicing_is_idempotent_once_h_bit_set() {
        let mut path = [wide_address(2, 0)];
        let idx = service_path(&mut path, DigipeaterRole::Wide, 2).unwrap();
        assert_eq!(path[0].ssid, 0);
        assert!(path[idx].has_been_repeated);
        // second attempt must find nothing left to service
        assert_eq!(
            service_path(&mut path, DigipeaterRole::Wide, 2),
            Err(Ax25Error::NoMatchingEntry)
        );
    }

    #[test]
    fn fill_in_role_ignores_wide2() {
        let mut path = [wide_address(2, 2)];
        assert_eq!(
            service_path(&mut path, DigipeaterRole::FillIn, 2),
            Err(Ax25Error::NoMatchingEntry)
        );
    }

    #[test]
    fn fill_in_role_services_wide1() {
        let mut path = [wide_address(1, 1)];
        let idx = service_path(&mut path, DigipeaterRole::FillIn, 2).unwrap();
        assert_eq!(path[idx].ssid, 0);
    }

    #[test]
    fn wide_role_respects_max_wide_n() {
        let mut path = [wide_address(4, 4)];
        assert_eq!(
            service_path(&mut path, DigipeaterRole::Wide, 2),
            Err(Ax25Error::NoMatchingEntry)
        );
        assert!(blocked_by_max_wide(&path, DigipeaterRole::Wide, 2));
    }

    #[test]
    fn services_first_unmarked_entry_only() {
        let mut path = [wide_address(2, 2), wide_address(2, 2)];
        path[0].has_been_repeated = true;
        let idx = service_path(&mut path, DigipeaterRole::Wide, 2).unwrap();
        assert_eq!(idx, 1);
    }

    #[test]
    fn none_role_services_nothing() {
        let mut path = [wide_address(1, 1)];
        assert_eq!(
            service_path(&mut path, DigipeaterRole::None, 2),
            Err(Ax25Error::NoMatchingEntry)
        );
    }
}

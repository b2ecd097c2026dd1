//! Checksummed request/response protocol spoken with the supervisory master.
//!
//! Frame layout (lengths big-endian):
//!
//! ```text
//! [0]        0x3A            start marker
//! [1]        to address
//! [2]        from address
//! [3]        function code
//! [4..6]     data length (u16)
//! [6..6+n]   data
//! [6+n]      LRC over bytes 1..6+n
//! [7+n..9+n] 0x0D 0x0A       end marker
//! ```
//!
//! The LRC is the two's-complement negation of the byte sum modulo 256.

mod assembler;
mod engine;
mod frame;

pub use assembler::FrameAssembler;
pub use engine::{Disposition, ProtocolConfig, ProtocolEngine, ProtocolHandle, FRAME_GAP};
pub use frame::WireFrame;

use thiserror::Error;

pub const START_MARKER: u8 = 0x3A;
pub const END_MARKER: [u8; 2] = [0x0D, 0x0A];

/// Start marker, two addresses, function code and the length field.
pub const HEADER_LEN: usize = 6;
/// LRC byte plus end marker.
pub const TRAILER_LEN: usize = 3;
pub const MIN_FRAME_LEN: usize = HEADER_LEN + TRAILER_LEN;
/// Largest frame the receive path accepts.
pub const MAX_FRAME_LEN: usize = 128;

pub const SLAVE_ADDR: u8 = 0x01;
pub const MASTER_ADDR: u8 = 0x00;

pub const FN_LIVE_QUERY: u8 = 0x01;
pub const FN_LIVE_REPLY: u8 = 0x02;
pub const FN_HISTORY_QUERY: u8 = 0x03;
pub const FN_HISTORY_REPLY: u8 = 0x04;

/// Two 14-digit timestamps back to back.
pub const HISTORY_QUERY_LEN: usize = 28;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame starts with 0x{0:02X}, expected 0x3A")]
    BadStartMarker(u8),
    #[error("frame is {0} bytes, shorter than the 9-byte minimum")]
    TooShort(usize),
    #[error("LRC mismatch: computed 0x{computed:02X}, received 0x{received:02X}")]
    ChecksumMismatch { computed: u8, received: u8 },
    #[error("length field declares {declared} data bytes but the frame carries {carried}")]
    LengthMismatch { declared: usize, carried: usize },
    #[error("{0} data bytes do not fit in one frame")]
    DataTooLong(usize),
}

/// Two's-complement LRC of `bytes`.
pub fn lrc(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
        .wrapping_neg()
}

/// True when the byte third from the end is the LRC of everything between the start
/// marker and that byte.
pub fn check_lrc(frame: &[u8]) -> bool {
    if frame.len() < 4 {
        return false;
    }
    let at = frame.len() - TRAILER_LEN;
    frame[at] == lrc(&frame[1..at])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lrc_negates_byte_sum() {
        assert_eq!(lrc(&[]), 0);
        assert_eq!(lrc(&[0x01, 0x00, 0x01, 0x00, 0x00]), 0xFE);
        assert_eq!(lrc(&[0xFF, 0x01]), 0x00);
        let bytes = [0x12, 0x34, 0x56, 0x78];
        let total = bytes.iter().fold(0u8, |a, b| a.wrapping_add(*b));
        assert_eq!(total.wrapping_add(lrc(&bytes)), 0);
    }

    #[test]
    fn any_single_byte_change_breaks_the_check() {
        let frame = WireFrame::new(SLAVE_ADDR, MASTER_ADDR, FN_HISTORY_QUERY, vec![0x31; 28])
            .encode()
            .unwrap();
        assert!(check_lrc(&frame));
        let lrc_at = frame.len() - TRAILER_LEN;
        for pos in 1..=lrc_at {
            for delta in 1..=255u8 {
                let mut mutated = frame.clone();
                mutated[pos] = mutated[pos].wrapping_add(delta);
                assert!(!check_lrc(&mutated), "pos {} delta {}", pos, delta);
            }
        }
    }

    #[test]
    fn check_rejects_tiny_input() {
        assert!(!check_lrc(&[]));
        assert!(!check_lrc(&[0x3A, 0x00, 0x0D]));
    }
}

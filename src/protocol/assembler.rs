use super::{HEADER_LEN, MAX_FRAME_LEN, START_MARKER, TRAILER_LEN};

/// Splits a byte stream into candidate frames.
///
/// Bytes before a start marker are dropped. The length field delimits each frame; a
/// header declaring more than [`MAX_FRAME_LEN`] bytes is treated as noise and the scan
/// resumes after its start marker. Validation is left to the decoder.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: Vec<u8>,
    discarded: u64,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete candidate frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.buf.iter().position(|b| *b == START_MARKER) {
                None => {
                    self.discard(self.buf.len());
                    return None;
                }
                Some(0) => {}
                Some(offset) => self.discard(offset),
            }
            if self.buf.len() < HEADER_LEN {
                return None;
            }
            let declared = u16::from_be_bytes([self.buf[4], self.buf[5]]) as usize;
            let total = HEADER_LEN + declared + TRAILER_LEN;
            if total > MAX_FRAME_LEN {
                self.discard(1);
                continue;
            }
            if self.buf.len() < total {
                return None;
            }
            return Some(self.buf.drain(..total).collect());
        }
    }

    /// Drop a partial frame, e.g. after an idle read.
    pub fn reset(&mut self) {
        self.discard(self.buf.len());
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Bytes thrown away while resynchronising.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    fn discard(&mut self, count: usize) {
        self.buf.drain(..count);
        self.discarded += count as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{WireFrame, FN_LIVE_QUERY, MASTER_ADDR, SLAVE_ADDR};

    fn live_query() -> Vec<u8> {
        WireFrame::new(SLAVE_ADDR, MASTER_ADDR, FN_LIVE_QUERY, vec![])
            .encode()
            .unwrap()
    }

    #[test]
    fn splits_back_to_back_frames() {
        let mut assembler = FrameAssembler::new();
        let mut stream = live_query();
        stream.extend(live_query());
        assembler.push(&stream);
        assert_eq!(assembler.next_frame(), Some(live_query()));
        assert_eq!(assembler.next_frame(), Some(live_query()));
        assert_eq!(assembler.next_frame(), None);
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn waits_for_split_frames() {
        let mut assembler = FrameAssembler::new();
        let frame = live_query();
        assembler.push(&frame[..4]);
        assert_eq!(assembler.next_frame(), None);
        assembler.push(&frame[4..]);
        assert_eq!(assembler.next_frame(), Some(frame));
    }

    #[test]
    fn resyncs_on_start_marker() {
        let mut assembler = FrameAssembler::new();
        assembler.push(&[0x00, 0xFF, 0x0A]);
        assembler.push(&live_query());
        assert_eq!(assembler.next_frame(), Some(live_query()));
        assert_eq!(assembler.discarded(), 3);
    }

    #[test]
    fn skips_oversized_headers() {
        let mut assembler = FrameAssembler::new();
        assembler.push(&[0x3A, 0x01, 0x00, 0x03, 0x01, 0x00]);
        assembler.push(&live_query());
        assert_eq!(assembler.next_frame(), Some(live_query()));
    }

    #[test]
    fn reset_drops_partial_frame() {
        let mut assembler = FrameAssembler::new();
        assembler.push(&live_query()[..5]);
        assert_eq!(assembler.next_frame(), None);
        assembler.reset();
        assert_eq!(assembler.pending(), 0);
        assembler.push(&live_query());
        assert_eq!(assembler.next_frame(), Some(live_query()));
    }
}

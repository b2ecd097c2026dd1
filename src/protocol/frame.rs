use super::{
    check_lrc, lrc, FrameError, END_MARKER, HEADER_LEN, MAX_FRAME_LEN, MIN_FRAME_LEN,
    START_MARKER, TRAILER_LEN,
};

/// One decoded protocol frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireFrame {
    pub to: u8,
    pub from: u8,
    pub function: u8,
    pub data: Vec<u8>,
}

impl WireFrame {
    pub fn new(to: u8, from: u8, function: u8, data: Vec<u8>) -> Self {
        Self {
            to,
            from,
            function,
            data,
        }
    }

    /// Serialize with LRC and end marker.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        if self.data.len() > MAX_FRAME_LEN - MIN_FRAME_LEN {
            return Err(FrameError::DataTooLong(self.data.len()));
        }
        let len = self.data.len() as u16;
        let mut out = Vec::with_capacity(MIN_FRAME_LEN + self.data.len());
        out.push(START_MARKER);
        out.push(self.to);
        out.push(self.from);
        out.push(self.function);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&self.data);
        let checksum = lrc(&out[1..]);
        out.push(checksum);
        out.extend_from_slice(&END_MARKER);
        Ok(out)
    }

    /// Validate and parse one complete frame.
    ///
    /// Checks run in order: start marker, minimum length, LRC, then the length field
    /// against the bytes actually carried. The end marker is not checked.
    pub fn decode(raw: &[u8]) -> Result<Self, FrameError> {
        let first = *raw.first().ok_or(FrameError::TooShort(0))?;
        if first != START_MARKER {
            return Err(FrameError::BadStartMarker(first));
        }
        if raw.len() < MIN_FRAME_LEN {
            return Err(FrameError::TooShort(raw.len()));
        }
        if !check_lrc(raw) {
            let at = raw.len() - TRAILER_LEN;
            return Err(FrameError::ChecksumMismatch {
                computed: lrc(&raw[1..at]),
                received: raw[at],
            });
        }
        let declared = u16::from_be_bytes([raw[4], raw[5]]) as usize;
        let carried = raw.len() - MIN_FRAME_LEN;
        if declared != carried {
            return Err(FrameError::LengthMismatch { declared, carried });
        }
        Ok(Self {
            to: raw[1],
            from: raw[2],
            function: raw[3],
            data: raw[HEADER_LEN..HEADER_LEN + declared].to_vec(),
        })
    }
}

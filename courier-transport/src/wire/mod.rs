//! Frame format for duplex byte streams.
//!
//! Frame format: `[length:4][checksum:4][kind:1][payload:N]`
//!
//! - **length**: Total frame size including header (little-endian u32)
//! - **checksum**: CRC32C of (kind + payload) for integrity verification
//! - **kind**: [`FrameKind`] discriminant
//! - **payload**: Codec bytes of an envelope, or the peer's instance id for `Hello`

/// Header size: 4 (length) + 4 (checksum) + 1 (kind) = 9 bytes.
pub const HEADER_SIZE: usize = 9;

/// Maximum payload size (16 MiB).
///
/// Frames larger than this are rejected before allocation.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Wire format error types.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WireError {
    /// Not enough data to parse the frame.
    #[error("insufficient data: need {needed} bytes, have {have}")]
    InsufficientData {
        /// Minimum bytes required to parse.
        needed: usize,
        /// Actual bytes available.
        have: usize,
    },

    /// Checksum verification failed - data was corrupted.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Expected checksum from header.
        expected: u32,
        /// Computed checksum from data.
        actual: u32,
    },

    /// Payload exceeds maximum allowed size.
    #[error("frame too large: {size} bytes (max {MAX_PAYLOAD_SIZE})")]
    FrameTooLarge {
        /// Payload size in bytes.
        size: usize,
    },

    /// Length field has an invalid value.
    #[error("invalid frame length: {length}")]
    InvalidLength {
        /// The invalid length value from the header.
        length: u32,
    },

    /// Kind byte is not a known frame kind.
    #[error("unknown frame kind: {kind}")]
    UnknownKind {
        /// The unrecognized discriminant.
        kind: u8,
    },
}

/// What a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Connection handshake announcing the sender's instance id.
    Hello = 1,
    /// A serialized envelope.
    Envelope = 2,
}

impl TryFrom<u8> for FrameKind {
    type Error = WireError;

    fn try_from(kind: u8) -> Result<Self, Self::Error> {
        match kind {
            1 => Ok(FrameKind::Hello),
            2 => Ok(FrameKind::Envelope),
            kind => Err(WireError::UnknownKind { kind }),
        }
    }
}

/// Frame header preceding the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Total frame size including header.
    pub length: u32,
    /// CRC32C checksum of (kind + payload).
    pub checksum: u32,
    /// Frame kind.
    pub kind: FrameKind,
}

impl FrameHeader {
    /// Append the [`HEADER_SIZE`] header bytes to `buf`.
    fn serialize_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.length.to_le_bytes());
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf.push(self.kind as u8);
    }

    /// Deserialize header from buffer.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` if buffer is smaller than HEADER_SIZE,
    /// `UnknownKind` if the kind byte is not recognized.
    pub fn deserialize(buf: &[u8]) -> Result<Self, WireError> {
        let Some(header) = buf.get(..HEADER_SIZE) else {
            return Err(WireError::InsufficientData {
                needed: HEADER_SIZE,
                have: buf.len(),
            });
        };

        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let checksum = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let kind = FrameKind::try_from(header[8])?;

        Ok(Self {
            length,
            checksum,
            kind,
        })
    }
}

fn compute_checksum(kind: FrameKind, payload: &[u8]) -> u32 {
    let crc = crc32c::crc32c(&[kind as u8]);
    crc32c::crc32c_append(crc, payload)
}

/// Serialize a frame.
///
/// Returns: `[length:4][checksum:4][kind:1][payload:N]`
///
/// # Errors
///
/// Returns `FrameTooLarge` if payload exceeds MAX_PAYLOAD_SIZE.
///
/// # Examples
///
/// ```
/// use courier_transport::wire::{FrameKind, deserialize_frame, serialize_frame};
///
/// let frame = serialize_frame(FrameKind::Envelope, b"hello").expect("serialize");
/// let (kind, payload) = deserialize_frame(&frame).expect("deserialize");
///
/// assert_eq!(kind, FrameKind::Envelope);
/// assert_eq!(payload.as_slice(), b"hello");
/// ```
pub fn serialize_frame(kind: FrameKind, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(WireError::FrameTooLarge {
            size: payload.len(),
        });
    }

    let total_length = HEADER_SIZE + payload.len();
    let header = FrameHeader {
        length: total_length as u32,
        checksum: compute_checksum(kind, payload),
        kind,
    };

    let mut data = Vec::with_capacity(total_length);
    header.serialize_into(&mut data);
    data.extend_from_slice(payload);
    Ok(data)
}

/// Deserialize a complete frame, validating length and checksum.
///
/// # Errors
///
/// - `InsufficientData`: Not enough bytes to parse header or full frame
/// - `ChecksumMismatch`: Data was corrupted
/// - `InvalidLength` / `FrameTooLarge`: Length field is malformed
pub fn deserialize_frame(data: &[u8]) -> Result<(FrameKind, Vec<u8>), WireError> {
    match try_deserialize_frame(data)? {
        Some((kind, payload, _)) => Ok((kind, payload)),
        None => {
            let needed = FrameHeader::deserialize(data)
                .map(|h| h.length as usize)
                .unwrap_or(HEADER_SIZE);
            Err(WireError::InsufficientData {
                needed,
                have: data.len(),
            })
        }
    }
}

/// Try to deserialize from a buffer that may contain partial data.
///
/// Used by stream readers where frames arrive incrementally.
///
/// # Returns
///
/// - `Ok(Some((kind, payload, consumed)))` if a complete frame was parsed
/// - `Ok(None)` if more data is needed (not an error condition)
/// - `Err` if data is malformed
///
/// # Examples
///
/// ```
/// use courier_transport::wire::{FrameKind, serialize_frame, try_deserialize_frame};
///
/// let frame = serialize_frame(FrameKind::Hello, b"peer-1").expect("serialize");
///
/// assert!(try_deserialize_frame(&frame[..5]).expect("partial").is_none());
/// assert!(try_deserialize_frame(&frame).expect("complete").is_some());
/// ```
pub fn try_deserialize_frame(
    data: &[u8],
) -> Result<Option<(FrameKind, Vec<u8>, usize)>, WireError> {
    if data.len() < HEADER_SIZE {
        return Ok(None);
    }

    let header = FrameHeader::deserialize(data)?;

    if (header.length as usize) < HEADER_SIZE {
        return Err(WireError::InvalidLength {
            length: header.length,
        });
    }
    let payload_len = header.length as usize - HEADER_SIZE;
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(WireError::FrameTooLarge { size: payload_len });
    }

    let expected_len = header.length as usize;
    let Some(payload) = data.get(HEADER_SIZE..expected_len) else {
        return Ok(None);
    };

    let computed = compute_checksum(header.kind, payload);
    if computed != header.checksum {
        return Err(WireError::ChecksumMismatch {
            expected: header.checksum,
            actual: computed,
        });
    }

    Ok(Some((header.kind, payload.to_vec(), expected_len)))
}

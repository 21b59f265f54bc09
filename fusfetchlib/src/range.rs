use crate::fus::FusError;

/// Inclusive byte range for a download request. An `end` of 0 means the
/// range is open-ended ("from `start` to the end of the file"), mirroring
/// the `bytes=<start>-` header form.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// The whole file: from the first byte, unbounded.
    pub fn full() -> Self {
        Self { start: 0, end: 0 }
    }

    /// Parse a byte-range header value such as `bytes=0-100` or `bytes=50-`.
    /// The `bytes=` prefix is optional. Missing offsets default to 0; a
    /// missing separator or non-numeric offset is [`FusError::InvalidRange`].
    pub fn parse(header: &str) -> Result<Self, FusError> {
        let value = header.trim();
        let value = value.strip_prefix("bytes=").unwrap_or(value);

        let (start, end) = value.split_once('-').ok_or(FusError::InvalidRange)?;

        Ok(Self {
            start: parse_offset(start)?,
            end: parse_offset(end)?,
        })
    }

    /// Decryption keeps running cipher state from the first block onward, so
    /// it can only be combined with an open-ended range. Must be called
    /// before any network traffic happens for the request.
    pub fn check_decryptable(&self, decrypt: bool) -> Result<(), FusError> {
        if decrypt && self.end != 0 {
            return Err(FusError::InvalidRange);
        }

        Ok(())
    }

    /// Render as a Range header value for the upstream request.
    pub fn to_header_value(&self) -> String {
        if self.end == 0 {
            format!("bytes={}-", self.start)
        } else {
            format!("bytes={}-{}", self.start, self.end)
        }
    }
}

fn parse_offset(s: &str) -> Result<u64, FusError> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(0);
    }

    s.parse().map_err(|_| FusError::InvalidRange)
}

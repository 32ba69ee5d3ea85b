//! HTTP Range header parsing and validation.
//!
//! Single-range only: multi-range requests would need multipart response
//! encoding and widen the attack surface, so they are rejected outright.
//! Oversized ranges are clamped to a fixed window rather than rejected —
//! large reads degrade to partial delivery instead of failing.

/// Maximum number of bytes a single range response may cover (50 MiB).
pub const MAX_RANGE_BYTES: u64 = 50 * 1024 * 1024;

/// A validated, inclusive byte window within an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Render as an upstream `Range` request header value.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }

    /// Render as a `Content-Range` response header value.
    pub fn content_range(&self, total_bytes: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total_bytes)
    }
}

/// Result of parsing an inbound `Range` header against a known object size.
///
/// `Invalid` is deliberately a single opaque outcome: callers must not
/// surface finer-grained reasons, so a requester cannot probe object sizes
/// through error differences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// No range requested; serve the whole object.
    Whole,
    /// A satisfiable range, clamped to the object and the policy window.
    Partial(ByteRange),
    /// Malformed or unsatisfiable request.
    Invalid,
}

/// Parse and validate a `Range` header value.
///
/// Accepts the three single-range forms (`N-M`, `N-`, `-N`), rejects
/// multi-range and non-`bytes` units, clamps `end` to the object and then to
/// [`MAX_RANGE_BYTES`] by shrinking, never by rejecting.
pub fn parse_range(header: Option<&str>, total_bytes: u64) -> RangeOutcome {
    let Some(header) = header else {
        return RangeOutcome::Whole;
    };

    let Some(spec) = header.strip_prefix("bytes=") else {
        return RangeOutcome::Invalid;
    };
    if spec.contains(',') {
        return RangeOutcome::Invalid;
    }
    if total_bytes == 0 {
        return RangeOutcome::Invalid;
    }

    let spec = spec.trim();
    let Some((start_str, end_str)) = spec.split_once('-') else {
        return RangeOutcome::Invalid;
    };

    let (start, end) = match (start_str.is_empty(), end_str.is_empty()) {
        // "-N": the final N bytes.
        (true, false) => {
            let Ok(suffix) = end_str.parse::<u64>() else {
                return RangeOutcome::Invalid;
            };
            if suffix == 0 {
                return RangeOutcome::Invalid;
            }
            (total_bytes.saturating_sub(suffix), total_bytes - 1)
        }
        // "N-": from N to the end.
        (false, true) => {
            let Ok(start) = start_str.parse::<u64>() else {
                return RangeOutcome::Invalid;
            };
            (start, total_bytes - 1)
        }
        // "N-M": explicit window.
        (false, false) => {
            match (start_str.parse::<u64>(), end_str.parse::<u64>()) {
                (Ok(start), Ok(end)) => (start, end),
                _ => return RangeOutcome::Invalid,
            }
        }
        (true, true) => return RangeOutcome::Invalid,
    };

    if end < start || start >= total_bytes {
        return RangeOutcome::Invalid;
    }

    let mut end = end.min(total_bytes - 1);
    if end - start + 1 > MAX_RANGE_BYTES {
        end = start + MAX_RANGE_BYTES - 1;
    }

    RangeOutcome::Partial(ByteRange { start, end })
}

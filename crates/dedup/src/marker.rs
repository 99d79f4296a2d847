use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::EXIF_COMPRESSION_MARKER;

/// 8-byte character-code header EXIF prepends to UserComment payloads
const USER_COMMENT_ASCII_HEADER: &[u8; 8] = b"ASCII\0\0\0";
const USER_COMMENT_UNDEFINED_HEADER: &[u8; 8] = &[0u8; 8];

/// Record that an item was compressed, at what quality and when
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionMarker {
    pub is_compressed: bool,
    /// 1..=100, or -1 when absent
    pub quality: i32,
    /// Unix milliseconds, or 0 when absent
    pub compressed_at: i64,
}

impl CompressionMarker {
    pub const ABSENT: CompressionMarker = CompressionMarker {
        is_compressed: false,
        quality: -1,
        compressed_at: 0,
    };

    pub fn new(quality: i32, compressed_at: i64) -> Self {
        CompressionMarker {
            is_compressed: true,
            quality,
            compressed_at,
        }
    }

    pub fn absent() -> Self {
        Self::ABSENT
    }

    pub fn compressed_at_datetime(&self) -> Option<DateTime<Utc>> {
        if !self.is_compressed {
            return None;
        }
        Utc.timestamp_millis_opt(self.compressed_at).single()
    }

    /// Marker string in the shared `<App>_Compressed:<quality>:<timestamp>` format
    pub fn encode(&self) -> String {
        format_marker(self.quality, self.compressed_at)
    }
}

impl Default for CompressionMarker {
    fn default() -> Self {
        Self::ABSENT
    }
}

pub fn format_marker(quality: i32, timestamp_ms: i64) -> String {
    format!("{}:{}:{}", EXIF_COMPRESSION_MARKER, quality, timestamp_ms)
}

/// Parse a marker string. Anything that is not a well-formed marker is `None`.
pub fn parse_marker(text: &str) -> Option<CompressionMarker> {
    if !text.starts_with(EXIF_COMPRESSION_MARKER) {
        return None;
    }

    let mut parts = text.split(':');
    let _prefix = parts.next()?;
    let quality: i32 = parts.next()?.trim().parse().ok()?;
    let timestamp: i64 = parts.next()?.trim().parse().ok()?;

    if !(1..=100).contains(&quality) || timestamp < 0 {
        return None;
    }

    Some(CompressionMarker::new(quality, timestamp))
}

/// Decode a raw EXIF UserComment payload and parse the marker in it
pub fn decode_user_comment(raw: &[u8]) -> Option<CompressionMarker> {
    let body = if raw.len() >= 8
        && (&raw[..8] == USER_COMMENT_ASCII_HEADER || &raw[..8] == USER_COMMENT_UNDEFINED_HEADER)
    {
        &raw[8..]
    } else {
        raw
    };

    let text = String::from_utf8_lossy(body);
    parse_marker(text.trim_end_matches('\0').trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_format_is_bit_exact() {
        assert_eq!(
            format_marker(70, 1_700_000_000_123),
            "CompressPhotoFast_Compressed:70:1700000000123"
        );
        assert_eq!(CompressionMarker::new(85, 42).encode(), "CompressPhotoFast_Compressed:85:42");
    }

    #[test]
    fn test_parse_rejects_foreign_comments() {
        assert_eq!(parse_marker(""), None);
        assert_eq!(parse_marker("Shot on a phone"), None);
        assert_eq!(parse_marker("OtherApp_Compressed:70:1"), None);
        assert_eq!(parse_marker("CompressPhotoFast_Compressed"), None);
        assert_eq!(parse_marker("CompressPhotoFast_Compressed:70"), None);
        assert_eq!(parse_marker("CompressPhotoFast_Compressed:high:1"), None);
        assert_eq!(parse_marker("CompressPhotoFast_Compressed:70:soon"), None);
    }

    #[test]
    fn test_parse_rejects_out_of_range_quality() {
        assert_eq!(parse_marker("CompressPhotoFast_Compressed:0:1000"), None);
        assert_eq!(parse_marker("CompressPhotoFast_Compressed:101:1000"), None);
        assert_eq!(parse_marker("CompressPhotoFast_Compressed:-1:1000"), None);
    }

    #[test]
    fn test_parse_ignores_trailing_fields() {
        let marker = parse_marker("CompressPhotoFast_Compressed:60:1000:extra").unwrap();
        assert_eq!(marker, CompressionMarker::new(60, 1000));
    }

    #[test]
    fn test_decode_user_comment_variants() {
        let plain = b"CompressPhotoFast_Compressed:70:5000";
        assert_eq!(decode_user_comment(plain), Some(CompressionMarker::new(70, 5000)));

        let mut ascii = b"ASCII\0\0\0".to_vec();
        ascii.extend_from_slice(b"CompressPhotoFast_Compressed:85:6000\0\0");
        assert_eq!(decode_user_comment(&ascii), Some(CompressionMarker::new(85, 6000)));

        let mut undefined = vec![0u8; 8];
        undefined.extend_from_slice(b"CompressPhotoFast_Compressed:60:7000");
        assert_eq!(decode_user_comment(&undefined), Some(CompressionMarker::new(60, 7000)));

        assert_eq!(decode_user_comment(&[0xff, 0xfe, 0x00]), None);
    }

    #[test]
    fn test_absent_sentinel() {
        let absent = CompressionMarker::absent();
        assert!(!absent.is_compressed);
        assert_eq!(absent.quality, -1);
        assert_eq!(absent.compressed_at, 0);
        assert_eq!(absent.compressed_at_datetime(), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Every marker this crate writes is read back unchanged by the parser
        #[test]
        fn test_written_markers_parse_back(
            quality in 1i32..=100,
            timestamp in 0i64..4_102_444_800_000,
        ) {
            let text = format_marker(quality, timestamp);
            prop_assert_eq!(parse_marker(&text), Some(CompressionMarker::new(quality, timestamp)));
        }
    }
}

//! HID report framing
//!
//! Every report buffer handed to the native layer starts with the report ID
//! (0x00 for devices without numbered reports) followed by the payload.
//! The functions here are pure so they can be tested without a device.

use std::fmt::Write as _;

/// Default input/feature report length (excluding report ID)
pub const DEFAULT_REPORT_LEN: usize = 64;

/// Length of the wide-character buffers used for native strings
pub const WSTR_LEN: usize = 512;

/// Report ID for devices that do not use numbered reports
pub const NO_REPORT_ID: u8 = 0x00;

/// Build an output report buffer
///
/// Format: `[report_id] [payload...] [zero padding...]`
///
/// At most `packet_len` payload bytes are written; anything beyond that is
/// dropped. With `pad` set the buffer is zero-extended to `packet_len + 1`.
/// Padding never truncates.
pub fn build_output_report(payload: &[u8], report_id: u8, packet_len: usize, pad: bool) -> Vec<u8> {
    let len = payload.len().min(packet_len);
    let total = if pad { packet_len + 1 } else { len + 1 };
    let mut buf = Vec::with_capacity(total);
    buf.push(report_id);
    buf.extend_from_slice(&payload[..len]);
    buf.resize(total, 0);
    buf
}

/// Build a feature report buffer: `[report_id] [payload...]`, no padding
pub fn build_feature_report(payload: &[u8], report_id: u8) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + 1);
    buf.push(report_id);
    buf.extend_from_slice(payload);
    buf
}

/// Extract the payload from a feature report read back from the device
///
/// `read` is the count the native layer returned, which includes the
/// report ID byte at `buf[0]`.
pub fn feature_report_payload(buf: &[u8], read: usize) -> Vec<u8> {
    let end = read.min(buf.len());
    if end <= 1 {
        return Vec::new();
    }
    buf[1..end].to_vec()
}

/// Decode a buffer of little-endian UTF-16 code units
///
/// Decoding stops at the first all-zero code unit or the end of the buffer.
/// A trailing odd byte is ignored and unpaired surrogates are replaced.
pub fn decode_wide_string(buf: &[u8]) -> String {
    let units: Vec<u16> = buf
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// Encode a string as a zero-terminated little-endian UTF-16 buffer
pub fn encode_wide_string(s: &str) -> Vec<u8> {
    let mut buf: Vec<u8> = s.encode_utf16().flat_map(u16::to_le_bytes).collect();
    buf.extend_from_slice(&[0, 0]);
    buf
}

/// Direction of a logged report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to device
    Out,
    /// Device to host
    In,
}

/// Format a report buffer for traffic logging
///
/// Format: `> [len]: xx xx ..` for host to device, `< [len]: ..` otherwise.
pub fn format_traffic(direction: Direction, buf: &[u8]) -> String {
    let mut line = String::with_capacity(8 + buf.len() * 3);
    line.push(match direction {
        Direction::Out => '>',
        Direction::In => '<',
    });
    let _ = write!(line, " [{:02x}]:", buf.len());
    for b in buf {
        let _ = write!(line, " {b:02x}");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_output_report() {
        let buf = build_output_report(&[0x3f, 0x23, 0x23], 0x00, 64, true);
        assert_eq!(buf.len(), 65);
        assert_eq!(buf[0], 0x00);
        assert_eq!(&buf[1..4], &[0x3f, 0x23, 0x23]);
        assert!(buf[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_unpadded_output_report() {
        let buf = build_output_report(&[0x01, 0x02], 0x05, 64, false);
        assert_eq!(buf, vec![0x05, 0x01, 0x02]);
    }

    #[test]
    fn test_output_report_clamps_to_packet_len() {
        let payload: Vec<u8> = (1..=10).collect();
        let buf = build_output_report(&payload, 0x00, 4, false);
        assert_eq!(buf, vec![0x00, 1, 2, 3, 4]);

        let padded = build_output_report(&payload, 0x00, 4, true);
        assert_eq!(padded, vec![0x00, 1, 2, 3, 4]);
    }

    #[test]
    fn test_empty_output_report() {
        assert_eq!(build_output_report(&[], 0x02, 0, false), vec![0x02]);
        assert_eq!(build_output_report(&[], 0x02, 3, true), vec![0x02, 0, 0, 0]);
    }

    #[test]
    fn test_feature_report() {
        assert_eq!(build_feature_report(&[0xAA, 0xBB], 0x03), vec![0x03, 0xAA, 0xBB]);
        assert_eq!(build_feature_report(&[], 0x00), vec![0x00]);
    }

    #[test]
    fn test_feature_report_payload() {
        let buf = [0x03, 0x10, 0x20, 0x30, 0x00];
        assert_eq!(feature_report_payload(&buf, 4), vec![0x10, 0x20, 0x30]);
        assert_eq!(feature_report_payload(&buf, 1), Vec::<u8>::new());
        assert_eq!(feature_report_payload(&buf, 99), vec![0x10, 0x20, 0x30, 0x00]);
    }

    #[test]
    fn test_decode_wide_string() {
        assert_eq!(
            decode_wide_string(&[0x61, 0x00, 0x62, 0x00, 0x63, 0x00]),
            "abc"
        );
        assert_eq!(decode_wide_string(&[]), "");
    }

    #[test]
    fn test_decode_wide_string_stops_at_zero_unit() {
        let buf = [0x61, 0x00, 0x00, 0x00, 0x62, 0x00];
        assert_eq!(decode_wide_string(&buf), "a");
    }

    #[test]
    fn test_decode_wide_string_keeps_zero_low_byte() {
        // U+0100 has a zero low byte but is not a terminator
        assert_eq!(decode_wide_string(&[0x00, 0x01, 0x41, 0x00]), "\u{100}A");
    }

    #[test]
    fn test_decode_wide_string_odd_length() {
        assert_eq!(decode_wide_string(&[0x61, 0x00, 0x62]), "a");
    }

    #[test]
    fn test_wide_string_encode_decode() {
        let buf = encode_wide_string("Keyboard ÄÖ");
        assert_eq!(&buf[buf.len() - 2..], &[0, 0]);
        assert_eq!(decode_wide_string(&buf), "Keyboard ÄÖ");
    }

    #[test]
    fn test_format_traffic() {
        assert_eq!(format_traffic(Direction::Out, &[0x00, 0x3f]), "> [02]: 00 3f");
        assert_eq!(format_traffic(Direction::In, &[0xab]), "< [01]: ab");
    }
}

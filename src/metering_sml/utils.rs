/// Interprets up to 8 bytes as an unsigned big endian number and returns it as
/// `i64`. Shorter input is zero filled on the left, so negative meter values are
/// not sign extended. Longer input keeps only the trailing 8 bytes.
pub fn big_endian_to_i64(raw: &[u8]) -> i64 {
    let raw = if raw.len() > 8 { &raw[raw.len() - 8..] } else { raw };

    let mut buffer = [0u8; 8];
    buffer[8 - raw.len()..].copy_from_slice(raw);
    u64::from_be_bytes(buffer) as i64
}

/// Position of the first occurrence of `needle` in `haystack`
pub fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Splits `data` on every occurrence of `separator`. The separator itself is
/// dropped, an input without separator yields a single segment.
pub fn split_on<'a>(data: &'a [u8], separator: &[u8]) -> Vec<&'a [u8]> {
    let mut segments = Vec::new();
    let mut rest = data;

    if separator.is_empty() {
        segments.push(data);
        return segments;
    }

    while let Some(pos) = find_subsequence(rest, separator) {
        segments.push(&rest[..pos]);
        rest = &rest[pos + separator.len()..];
    }
    segments.push(rest);
    segments
}

/// Formats the three OBIS bytes C, D and E as `C.D.E`
pub fn format_short_obis(bytes: &[u8]) -> String {
    format!("{}.{}.{}", bytes[0], bytes[1], bytes[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_small_values() {
        assert_eq!(big_endian_to_i64(&[]), 0);
        assert_eq!(big_endian_to_i64(&[0x01]), 1);
        assert_eq!(big_endian_to_i64(&[0xFF, 0xFF]), 65535);
        assert_eq!(big_endian_to_i64(&[0x03, 0xE8]), 1000);
    }

    #[test]
    fn test_big_endian_no_sign_extension() {
        // A negative 16 bit value stays positive
        assert_eq!(big_endian_to_i64(&[0xFF, 0x38]), 0xFF38);
        // All 8 bytes set wraps into the i64 range
        assert_eq!(big_endian_to_i64(&[0xFF; 8]), -1);
    }

    #[test]
    fn test_big_endian_truncates_from_front() {
        let raw = [0xAA, 0xBB, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00];
        assert_eq!(big_endian_to_i64(&raw), 256);
    }

    #[test]
    fn test_find_subsequence() {
        let data = [0x00, 0x1B, 0x1B, 0x1A, 0x1B];
        assert_eq!(find_subsequence(&data, &[0x1B, 0x1A]), Some(2));
        assert_eq!(find_subsequence(&data, &[0x1A, 0x1A]), None);
        assert_eq!(find_subsequence(&[0x01], &[0x01, 0x02]), None);
    }

    #[test]
    fn test_split_on() {
        let data = [0x01, 0x77, 0x07, 0x02, 0x03, 0x77, 0x07];
        let parts = split_on(&data, &[0x77, 0x07]);
        assert_eq!(parts, vec![&[0x01][..], &[0x02, 0x03][..], &[][..]]);

        let parts = split_on(&data, &[0x55]);
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn test_format_short_obis() {
        assert_eq!(format_short_obis(&[1, 8, 0, 255]), "1.8.0");
        assert_eq!(format_short_obis(&[16, 7, 0]), "16.7.0");
    }
}

use super::structs::*;
use super::utils::{big_endian_to_i64, find_subsequence, format_short_obis, split_on};
use log::{debug, warn};

/// Offset of the size code in records of the fixed offset layout
const FIXED_SIZE_OFFSET: usize = 10;
/// Offset of the first value byte in records of the fixed offset layout
const FIXED_VALUE_OFFSET: usize = 11;

/// Decodes all watt hour readings of a framed telegram in the order they appear.
///
/// Broken records are skipped, a telegram never fails as a whole. Repeated
/// identifiers produce repeated readings.
pub fn decode_readings(telegram: &[u8], strategy: DecodeStrategy, factor: i64) -> Vec<Reading> {
    let mut result = Vec::with_capacity(5);

    // The first part is the telegram header in front of the first record
    for record in split_on(telegram, &RECORD_PREFIX).into_iter().skip(1) {
        debug!("Decoding record {}", hex::encode(record));

        if record.len() < MIN_RECORD_LEN {
            warn!("Data chunk too small, {}<{}", record.len(), MIN_RECORD_LEN);
            continue;
        }

        let obis = format_short_obis(record);
        debug!("Decoded obis {}", obis);

        let raw = match strategy {
            DecodeStrategy::UnitMarker => unit_marker_value(record),
            DecodeStrategy::FixedOffset => fixed_offset_value(record),
        };

        match raw {
            Some(bytes) => {
                let value = big_endian_to_i64(bytes) as f64 / factor as f64;
                debug!("Decoded value {} for {}", value, obis);
                result.push(Reading::new(obis, value));
            }
            None => {
                debug!("Skipping record {} without decodable value", obis);
            }
        }
    }

    result
}

/// Value bytes behind the watt hour unit tag. The byte after the scaler is an
/// SML type-length field whose length nibble counts itself, so the value spans
/// one byte less than announced. Only the first tag counts, a later `62 1E`
/// inside the value bytes is part of the value.
fn unit_marker_value(record: &[u8]) -> Option<&[u8]> {
    let marker = find_subsequence(record, &WATT_HOUR_UNIT)?;
    let segment = &record[marker + WATT_HOUR_UNIT.len()..];

    if segment.len() < 3 {
        debug!("Unit marker without type-length byte");
        return None;
    }

    let size = (segment[2] & 0x0F) as usize;
    if size == 0 {
        return None;
    }

    let end = 3 + size - 1;
    if segment.len() < end {
        warn!("Record announces {} value bytes but only {} are present", size - 1, segment.len().saturating_sub(3));
        return None;
    }
    Some(&segment[3..end])
}

fn fixed_offset_value(record: &[u8]) -> Option<&[u8]> {
    let size = map_byte_count(record[FIXED_SIZE_OFFSET]);
    if size == 0 {
        return None;
    }

    let end = FIXED_VALUE_OFFSET + size;
    if record.len() < end {
        warn!("Record announces {} value bytes but is only {} bytes long", size, record.len());
        return None;
    }
    Some(&record[FIXED_VALUE_OFFSET..end])
}

fn map_byte_count(size_info: u8) -> usize {
    match size_info {
        0x55 => 4,
        0x56 => 5,
        _ => {
            debug!("Tried to decode unknown size info: {:02x}", size_info);
            0
        }
    }
}

use lazy_static::lazy_static;
use std::collections::HashMap;

lazy_static! {
    static ref DESCRIPTIONS: HashMap<&'static str, &'static str> = get_standard_obis_descriptions();
}

/// Human readable name of a short `C.D.E` electricity OBIS id
pub fn get_obis_description(identifier: &str) -> Option<&'static str> {
    DESCRIPTIONS.get(identifier).copied()
}

/// Like [`get_obis_description`] but falls back to the identifier itself
pub fn display_name(identifier: &str) -> String {
    get_obis_description(identifier)
        .map(|d| d.to_string())
        .unwrap_or_else(|| identifier.to_string())
}

pub fn get_standard_obis_descriptions() -> HashMap<&'static str, &'static str> {
    let mut map = HashMap::new();

    // Energy values
    map.insert("1.8.0", "Active energy + (total)");
    map.insert("1.8.1", "Active energy + (tariff 1)");
    map.insert("1.8.2", "Active energy + (tariff 2)");
    map.insert("2.8.0", "Active energy - (total)");
    map.insert("2.8.1", "Active energy - (tariff 1)");
    map.insert("2.8.2", "Active energy - (tariff 2)");
    map.insert("15.8.0", "Absolute active energy total");

    // Reactive energy
    map.insert("3.8.0", "Reactive energy + (total)");
    map.insert("4.8.0", "Reactive energy - (total)");

    // Power values
    map.insert("1.7.0", "Active power + (total)");
    map.insert("2.7.0", "Active power - (total)");
    map.insert("16.7.0", "Sum active instantaneous power");
    map.insert("21.7.0", "Active power + (L1)");
    map.insert("41.7.0", "Active power + (L2)");
    map.insert("61.7.0", "Active power + (L3)");
    map.insert("36.7.0", "Active power (L1)");
    map.insert("56.7.0", "Active power (L2)");
    map.insert("76.7.0", "Active power (L3)");

    // Voltage, current, frequency
    map.insert("32.7.0", "Voltage (L1)");
    map.insert("52.7.0", "Voltage (L2)");
    map.insert("72.7.0", "Voltage (L3)");
    map.insert("31.7.0", "Current (L1)");
    map.insert("51.7.0", "Current (L2)");
    map.insert("71.7.0", "Current (L3)");
    map.insert("14.7.0", "Supply frequency");

    map
}

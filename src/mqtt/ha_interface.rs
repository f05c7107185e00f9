use serde::Serialize;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct HaDevice {
    pub identifiers: Vec<String>,
    pub name: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct HaOrigin {
    pub name: String,
    pub sw_version: String,
}

impl HaOrigin {
    fn exporter() -> Self {
        HaOrigin {
            name: env!("CARGO_PKG_NAME").to_string(),
            sw_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Home Assistant MQTT discovery document for one meter value
#[derive(Serialize, Debug, Clone)]
pub struct HaSensorDiscovery {
    pub device_class: String,
    pub state_class: String,
    pub state_topic: String,
    pub unit_of_measurement: String,
    pub name: String,
    pub unique_id: String,
    pub object_id: String,
    pub enabled_by_default: bool,
    pub device: HaDevice,
    pub o: HaOrigin,
    #[serde(skip_serializing)]
    pub discover_topic: String,
}

/// `1.8.0` becomes `1_8_0`, dots are not allowed in discovery object ids
pub fn object_suffix(identifier: &str) -> String {
    identifier.replace('.', "_")
}

impl HaSensorDiscovery {
    pub fn new_energy(discovery_prefix: &str, meter_name: &str, identifier: &str, name: String, state_topic: String, unit: &str) -> Self {
        let oid = object_suffix(identifier);

        return HaSensorDiscovery {
            discover_topic: format!("{}/sensor/{}/{}/config", discovery_prefix, meter_name, oid),
            device_class: "energy".to_string(),
            state_class: "total_increasing".to_string(),
            state_topic: state_topic,
            unit_of_measurement: unit.to_string(),
            name: name,
            unique_id: format!("{}_{}", meter_name, oid),
            object_id: format!("{}_{}", meter_name, oid),
            enabled_by_default: true,
            device: HaDevice {
                identifiers: vec![meter_name.to_string()],
                name: "Powermeter".to_string(),
            },
            o: HaOrigin::exporter(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_discovery_document() {
        let disc = HaSensorDiscovery::new_energy(
            "homeassistant",
            "house",
            "1.8.0",
            "Active energy + (total)".to_string(),
            "powermeter/house/1.8.0".to_string(),
            "kWh",
        );
        assert_eq!(disc.discover_topic, "homeassistant/sensor/house/1_8_0/config");

        let json: serde_json::Value = serde_json::to_value(&disc).unwrap();
        assert_eq!(json["device_class"], "energy");
        assert_eq!(json["state_class"], "total_increasing");
        assert_eq!(json["state_topic"], "powermeter/house/1.8.0");
        assert_eq!(json["unit_of_measurement"], "kWh");
        assert_eq!(json["name"], "Active energy + (total)");
        assert_eq!(json["unique_id"], "house_1_8_0");
        assert_eq!(json["object_id"], "house_1_8_0");
        assert_eq!(json["enabled_by_default"], true);
        assert_eq!(json["device"]["identifiers"][0], "house");
        assert_eq!(json["device"]["name"], "Powermeter");
        assert!(json.get("discover_topic").is_none());
    }
}

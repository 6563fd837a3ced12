//! `/api` status document.

use crate::context::Snapshot;
use node_modbus::PowerReading;
use serde::Serialize;

/// Compact status for polling clients. Unknown readings are `null`.
#[derive(Debug, Clone, Serialize)]
pub struct ApiStatus {
    /// Temperature, °C.
    pub t: Option<f32>,
    /// Relative humidity, %.
    pub h: Option<f32>,
    /// Relay states, relay 1 first.
    pub r: [u8; 8],
    /// Digital input level.
    pub d: u8,
    /// Power meter. Always an object; its members are `null` without a
    /// reading.
    pub pz: ApiPower,
}

/// Power meter section of [`ApiStatus`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApiPower {
    /// Volts.
    pub v: Option<f32>,
    /// Amperes.
    pub a: Option<f32>,
    /// Watts.
    pub w: Option<f32>,
    /// Watt-hours.
    pub e: Option<u32>,
    /// Hertz.
    pub f: Option<f32>,
    /// Power factor.
    pub pf: Option<f32>,
}

impl From<Option<PowerReading>> for ApiPower {
    fn from(reading: Option<PowerReading>) -> Self {
        reading.map_or_else(Self::default, |p| Self {
            v: Some(p.voltage),
            a: Some(p.current),
            w: Some(p.power),
            e: Some(p.energy_wh),
            f: Some(p.frequency),
            pf: Some(p.power_factor),
        })
    }
}

impl From<&Snapshot> for ApiStatus {
    fn from(snapshot: &Snapshot) -> Self {
        let climate = snapshot.climate.value();
        Self {
            t: climate.map(|c| c.temperature),
            h: climate.map(|c| c.humidity),
            r: snapshot.relays.map(u8::from),
            d: u8::from(snapshot.input.unwrap_or(false)),
            pz: ApiPower::from(snapshot.power.value()),
        }
    }
}

/// Serialize the snapshot for `/api`.
#[must_use]
pub fn render(snapshot: &Snapshot) -> String {
    serde_json::to_string(&ApiStatus::from(snapshot)).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripherals::ClimateSample;
    use node_common::reading::Reading;

    #[test]
    fn test_unknown_readings_are_null() {
        let snapshot = Snapshot {
            climate: Reading::Unknown,
            relays: [false, true, false, false, false, false, false, true],
            input: Some(true),
            power: Reading::Unknown,
            uptime_ms: 0,
        };
        assert_eq!(
            render(&snapshot),
            r#"{"t":null,"h":null,"r":[0,1,0,0,0,0,0,1],"d":1,"pz":{"v":null,"a":null,"w":null,"e":null,"f":null,"pf":null}}"#
        );
    }

    #[test]
    fn test_stale_readings_still_reported() {
        let snapshot = Snapshot {
            climate: Reading::Stale(ClimateSample {
                temperature: 21.5,
                humidity: 40.0,
            }),
            relays: [false; 8],
            input: None,
            power: Reading::Fresh(PowerReading {
                voltage: 230.5,
                current: 0.25,
                power: 50.0,
                energy_wh: 12,
                frequency: 50.0,
                power_factor: 0.5,
                alarm: false,
            }),
            uptime_ms: 0,
        };
        let json: serde_json::Value = serde_json::from_str(&render(&snapshot)).unwrap();
        assert_eq!(json["t"], 21.5);
        assert_eq!(json["h"], 40.0);
        assert_eq!(json["d"], 0);
        assert_eq!(json["pz"]["v"], 230.5);
        assert_eq!(json["pz"]["e"], 12);
        assert_eq!(json["pz"]["pf"], 0.5);
    }
}

use hifitime::prelude::Epoch;

use serde::{Deserialize, Serialize};

use crate::assistance::epoch_text;

/// Klobuchar ionospheric model (broadcast coefficients)
#[derive(Debug, Default, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct IonoModel {
    pub alpha: [f64; 4],
    pub beta: [f64; 4],
}

/// GPS to UTC conversion model
#[derive(Debug, Default, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtcModel {
    pub a0: f64,
    pub a1: f64,
    /// Reference time of week (s)
    pub tot: u32,
    /// Reference week
    pub wnt: u16,
    /// Current leap seconds
    pub dt_ls: i16,
    /// Week of the next leap second event
    pub wn_lsf: u16,
    /// Day of the next leap second event
    pub dn: u8,
    /// Leap seconds after the next event
    pub dt_lsf: i16,
}

/// Reference time, with its uncertainty
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceTime {
    #[serde(with = "epoch_text")]
    pub epoch: Epoch,
    /// Uncertainty (s)
    pub uncertainty_s: f64,
}

/// Reference geodetic location
#[derive(Debug, Default, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Location")]
pub struct ReferenceLocation {
    pub latitude_ddeg: f64,
    pub longitude_ddeg: f64,
    /// Ellipsoidal height (m)
    pub height_m: f64,
    /// Horizontal uncertainty (m)
    pub uncertainty_m: f64,
}

impl ReferenceLocation {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude_ddeg)
            && (-180.0..=180.0).contains(&self.longitude_ddeg)
            && self.height_m.is_finite()
            && self.uncertainty_m >= 0.0
    }
}

/// Serialized content of a [ReferenceLocation], prior validation
#[derive(Deserialize)]
struct Location {
    latitude_ddeg: f64,
    longitude_ddeg: f64,
    height_m: f64,
    uncertainty_m: f64,
}

impl TryFrom<Location> for ReferenceLocation {
    type Error = String;
    fn try_from(content: Location) -> Result<Self, Self::Error> {
        let location = Self {
            latitude_ddeg: content.latitude_ddeg,
            longitude_ddeg: content.longitude_ddeg,
            height_m: content.height_m,
            uncertainty_m: content.uncertainty_m,
        };

        if location.is_valid() {
            Ok(location)
        } else {
            Err(format!(
                "invalid reference location: lat={} lon={} uncertainty={}",
                location.latitude_ddeg, location.longitude_ddeg, location.uncertainty_m
            ))
        }
    }
}

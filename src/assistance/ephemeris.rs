use hifitime::prelude::{Epoch, TimeScale};

use gnss::prelude::{Constellation, SV};

use log::warn;

use serde::{Deserialize, Serialize};

/// GPS (LNAV) broadcast ephemeris, for one satellite
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsEphemeris {
    #[serde(with = "sv_text")]
    pub sv: SV,

    /// Week number
    pub week: u16,
    /// Time of clock (s)
    pub toc: u32,
    pub af0: f64,
    pub af1: f64,
    pub af2: f64,
    /// Total group delay (s)
    pub tgd: f64,
    /// Issue of data (clock)
    pub iodc: u16,

    /// Time of ephemeris (s)
    pub toe: u32,
    pub m0: f64,
    pub dn: f64,
    pub cuc: f64,
    pub cus: f64,
    pub crs: f64,
    pub e: f64,
    pub sqrt_a: f64,

    pub cic: f64,
    pub cis: f64,
    pub crc: f64,
    pub i0: f64,
    /// Issue of data (ephemeris)
    pub iode: u8,
    pub idot: f64,
    pub omega0: f64,
    pub omega: f64,
    pub omega_dot: f64,
}

impl GpsEphemeris {
    /// Time of clock, as [Epoch] expressed in [TimeScale::GPST]
    pub fn toc_epoch(&self) -> Epoch {
        Epoch::from_time_of_week(
            self.week as u32,
            self.toc as u64 * 1_000_000_000,
            TimeScale::GPST,
        )
    }

    /// Clock and orbit terms must describe the same data set:
    /// IODE matches the 8 LSB of IODC.
    pub fn is_consistent(&self) -> bool {
        (self.iodc & 0xff) as u8 == self.iode
    }
}

/// Set of [GpsEphemeris], one per satellite.
/// Decoded sets are built through [EphemerisSet::new] as well.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Ephemerides")]
pub struct EphemerisSet {
    ephemerides: Vec<GpsEphemeris>,
}

/// Serialized content of an [EphemerisSet], prior validation
#[derive(Deserialize)]
struct Ephemerides {
    ephemerides: Vec<GpsEphemeris>,
}

impl From<Ephemerides> for EphemerisSet {
    fn from(content: Ephemerides) -> Self {
        Self::new(content.ephemerides)
    }
}

impl EphemerisSet {
    /// Builds a new [EphemerisSet]. Inconsistent or non GPS ephemerides are rejected,
    /// and a newer ephemeris replaces a prior one for the same satellite.
    pub fn new<I: IntoIterator<Item = GpsEphemeris>>(ephemerides: I) -> Self {
        let mut s = Self::default();

        for ephemeris in ephemerides {
            if ephemeris.sv.constellation != Constellation::GPS {
                warn!("{} - not a GPS ephemeris: rejected", ephemeris.sv);
                continue;
            }

            if !ephemeris.is_consistent() {
                warn!(
                    "{} - inconsistent ephemeris (iodc={} iode={}): rejected",
                    ephemeris.sv, ephemeris.iodc, ephemeris.iode
                );
                continue;
            }

            match s.ephemerides.iter_mut().find(|e| e.sv == ephemeris.sv) {
                Some(prior) => {
                    if ephemeris.toc_epoch() >= prior.toc_epoch() {
                        *prior = ephemeris;
                    }
                },
                None => s.ephemerides.push(ephemeris),
            }
        }

        s.ephemerides.sort_by_key(|e| e.sv.prn);
        s
    }

    pub fn get(&self, sv: SV) -> Option<&GpsEphemeris> {
        self.ephemerides.iter().find(|e| e.sv == sv)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GpsEphemeris> {
        self.ephemerides.iter()
    }

    pub fn len(&self) -> usize {
        self.ephemerides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ephemerides.is_empty()
    }
}

/// (De)serializes [SV] through its textual representation ("G01")
mod sv_text {
    use gnss::prelude::SV;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(sv: &SV, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(sv)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SV, D::Error> {
        let text = String::deserialize(d)?;
        SV::from_str(text.trim()).map_err(D::Error::custom)
    }
}

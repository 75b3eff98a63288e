//! GNSS assistance data: orbital/clock models, atmospheric and time models,
//! reference time and position, used to shorten cold acquisition.
use std::{collections::BTreeMap, str::FromStr};

use hifitime::prelude::Epoch;

use serde::{Deserialize, Serialize};

use thiserror::Error;

pub mod client;
pub mod ephemeris;
pub mod fd;
pub mod models;
pub mod service;
pub mod store;

pub use client::{AssistanceClient, AssistanceService, FetchError};
pub use ephemeris::EphemerisSet;
pub use models::{IonoModel, ReferenceLocation, ReferenceTime, UtcModel};
pub use store::{AssistanceStore, StoreError};

/// Kind of assistance data. Each kind is fetched, cached and superseded independently.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AssistanceKind {
    /// Set of broadcast ephemerides
    Ephemeris,
    /// Klobuchar ionospheric model
    Iono,
    /// GPS to UTC conversion model
    UtcModel,
    /// Reference time
    ReferenceTime,
    /// Reference location
    ReferenceLocation,
}

impl AssistanceKind {
    /// All kinds, in persistence order
    pub const ALL: [Self; 5] = [
        Self::Ephemeris,
        Self::Iono,
        Self::UtcModel,
        Self::ReferenceTime,
        Self::ReferenceLocation,
    ];

    /// Stable identifier, used in control payloads
    pub fn id(&self) -> u8 {
        match self {
            Self::Ephemeris => 0,
            Self::Iono => 1,
            Self::UtcModel => 2,
            Self::ReferenceTime => 3,
            Self::ReferenceLocation => 4,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }

    /// Stable storage key
    pub fn file_stem(&self) -> &'static str {
        match self {
            Self::Ephemeris => "gps_ephemeris",
            Self::Iono => "gps_iono",
            Self::UtcModel => "gps_utc_model",
            Self::ReferenceTime => "gps_ref_time",
            Self::ReferenceLocation => "gps_ref_location",
        }
    }
}

impl std::fmt::Display for AssistanceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ephemeris => write!(f, "ephemeris"),
            Self::Iono => write!(f, "iono"),
            Self::UtcModel => write!(f, "utc-model"),
            Self::ReferenceTime => write!(f, "ref-time"),
            Self::ReferenceLocation => write!(f, "ref-location"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown assistance kind \"{0}\"")]
pub struct UnknownKind(pub String);

impl FromStr for AssistanceKind {
    type Err = UnknownKind;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "eph" | "ephemeris" => Ok(Self::Ephemeris),
            "iono" | "ionosphere" => Ok(Self::Iono),
            "utc" | "utc-model" => Ok(Self::UtcModel),
            "time" | "ref-time" => Ok(Self::ReferenceTime),
            "location" | "pos" | "ref-location" => Ok(Self::ReferenceLocation),
            _ => Err(UnknownKind(s.to_string())),
        }
    }
}

/// Where an [AssistanceRecord] comes from
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum Source {
    /// Freshly obtained from the assistance service
    Network,
    /// Loaded from the local [AssistanceStore]
    #[default]
    Cache,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Cache => write!(f, "cache"),
        }
    }
}

/// Assistance content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum AssistanceData {
    Ephemeris(EphemerisSet),
    Iono(IonoModel),
    UtcModel(UtcModel),
    ReferenceTime(ReferenceTime),
    ReferenceLocation(ReferenceLocation),
}

impl AssistanceData {
    pub fn kind(&self) -> AssistanceKind {
        match self {
            Self::Ephemeris(_) => AssistanceKind::Ephemeris,
            Self::Iono(_) => AssistanceKind::Iono,
            Self::UtcModel(_) => AssistanceKind::UtcModel,
            Self::ReferenceTime(_) => AssistanceKind::ReferenceTime,
            Self::ReferenceLocation(_) => AssistanceKind::ReferenceLocation,
        }
    }
}

/// One assistance record. Never mutated: a fresher record replaces it wholesale.
/// The [Source] tag is not persisted: anything read back from storage is [Source::Cache].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistanceRecord {
    /// Validity (freshness) [Epoch]
    #[serde(with = "epoch_text")]
    pub epoch: Epoch,

    /// Record [Source]
    #[serde(skip)]
    pub source: Source,

    /// Content
    #[serde(flatten)]
    pub data: AssistanceData,
}

impl AssistanceRecord {
    pub fn kind(&self) -> AssistanceKind {
        self.data.kind()
    }

    /// Copies this record, with a different [Source] tag
    pub fn with_source(&self, source: Source) -> Self {
        let mut s = self.clone();
        s.source = source;
        s
    }
}

impl std::fmt::Display for AssistanceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}) valid {}", self.kind(), self.source, self.epoch)?;
        if let AssistanceData::Ephemeris(set) = &self.data {
            write!(f, " - {} satellites", set.len())?;
        }
        Ok(())
    }
}

/// Best available [AssistanceRecord] per [AssistanceKind]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AssistanceSet {
    records: BTreeMap<AssistanceKind, AssistanceRecord>,
}

impl AssistanceSet {
    /// Inserts a record, replacing any prior record of the same kind
    pub fn insert(&mut self, record: AssistanceRecord) -> Option<AssistanceRecord> {
        self.records.insert(record.kind(), record)
    }

    pub fn get(&self, kind: AssistanceKind) -> Option<&AssistanceRecord> {
        self.records.get(&kind)
    }

    pub fn contains(&self, kind: AssistanceKind) -> bool {
        self.records.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn kinds(&self) -> impl Iterator<Item = AssistanceKind> + '_ {
        self.records.keys().copied()
    }

    pub fn records(&self) -> impl Iterator<Item = &AssistanceRecord> {
        self.records.values()
    }

    /// Returns the requested kinds this set does not provide
    pub fn missing(&self, kinds: &[AssistanceKind]) -> Vec<AssistanceKind> {
        kinds
            .iter()
            .filter(|kind| !self.contains(**kind))
            .copied()
            .collect()
    }

    /// Merges network and cached results: per kind, the network record
    /// wins when present, otherwise the cached one. Kinds absent from both
    /// stay unset (cold acquisition).
    pub fn merge(network: Self, cached: Self) -> Self {
        let mut merged = cached;
        for (_, record) in network.records {
            merged.insert(record);
        }
        merged
    }
}

impl FromIterator<AssistanceRecord> for AssistanceSet {
    fn from_iter<I: IntoIterator<Item = AssistanceRecord>>(iter: I) -> Self {
        let mut set = Self::default();
        for record in iter {
            set.insert(record);
        }
        set
    }
}

/// (De)serializes [Epoch] through its textual representation
pub(crate) mod epoch_text {
    use hifitime::prelude::Epoch;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(epoch: &Epoch, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(epoch)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Epoch, D::Error> {
        let text = String::deserialize(d)?;
        Epoch::from_str(text.trim()).map_err(D::Error::custom)
    }
}

//! Control commands, decoded from raw bus [Event]s.
use crate::{
    assistance::AssistanceKind,
    bus::{Event, ProducerId, RawCode},
};

/// Known control codes
pub mod code {
    use crate::bus::RawCode;

    /// Channel failed to acquire its satellite. Payload: channel (u16 LE)
    pub const CHANNEL_ACQUISITION_FAILED: RawCode = 1;
    /// Channel acquired its satellite. Payload: channel (u16 LE)
    pub const CHANNEL_ACQUISITION_SUCCESS: RawCode = 2;
    /// Channel lost track of its satellite. Payload: channel (u16 LE)
    pub const CHANNEL_TRACKING_LOST: RawCode = 3;
    /// New navigation solution. Payload: latitude, longitude, height (3x f64 LE)
    pub const SOLUTION_UPDATED: RawCode = 5;
    /// New assistance record obtained. Payload: kind id (u8)
    pub const ASSISTANCE_UPDATED: RawCode = 10;
    /// Stop request
    pub const STOP: RawCode = 200;
    /// Free form operator input. Payload: text
    pub const OPERATOR_INPUT: RawCode = 1000;
}

/// Tracking channel state
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChannelState {
    AcquisitionFailed,
    AcquisitionSucceeded,
    TrackingLost,
}

impl ChannelState {
    fn from_code(code: RawCode) -> Option<Self> {
        match code {
            code::CHANNEL_ACQUISITION_FAILED => Some(Self::AcquisitionFailed),
            code::CHANNEL_ACQUISITION_SUCCESS => Some(Self::AcquisitionSucceeded),
            code::CHANNEL_TRACKING_LOST => Some(Self::TrackingLost),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AcquisitionFailed => write!(f, "acquisition failed"),
            Self::AcquisitionSucceeded => write!(f, "acquired"),
            Self::TrackingLost => write!(f, "tracking lost"),
        }
    }
}

/// Navigation solution summary
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct Solution {
    pub latitude_ddeg: f64,
    pub longitude_ddeg: f64,
    pub height_m: f64,
}

impl Solution {
    pub fn to_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(24);
        payload.extend_from_slice(&self.latitude_ddeg.to_le_bytes());
        payload.extend_from_slice(&self.longitude_ddeg.to_le_bytes());
        payload.extend_from_slice(&self.height_m.to_le_bytes());
        payload
    }

    fn from_payload(payload: &[u8]) -> Option<Self> {
        if payload.len() != 24 {
            return None;
        }

        let value = |offset: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&payload[offset..offset + 8]);
            f64::from_le_bytes(bytes)
        };

        let solution = Self {
            latitude_ddeg: value(0),
            longitude_ddeg: value(8),
            height_m: value(16),
        };

        if solution.latitude_ddeg.is_finite()
            && solution.longitude_ddeg.is_finite()
            && solution.height_m.is_finite()
        {
            Some(solution)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Solution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "lat={:.6}° lon={:.6}° h={:.2}m",
            self.latitude_ddeg, self.longitude_ddeg, self.height_m
        )
    }
}

/// Channel payload
pub fn channel_payload(channel: u16) -> Vec<u8> {
    channel.to_le_bytes().to_vec()
}

/// Decoded control [Command]
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Receiver must stop
    StopReceiver,
    /// A tracking channel changed state
    ChannelStateChanged { channel: u16, state: ChannelState },
    /// New navigation solution
    SolutionUpdated(Solution),
    /// The background collector obtained a new assistance record
    AssistanceUpdated { kind: AssistanceKind },
    /// Unrecognized (origin, code) combination or malformed payload
    Unknown { raw_code: RawCode },
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopReceiver => write!(f, "stop receiver"),
            Self::ChannelStateChanged { channel, state } => {
                write!(f, "channel #{} {}", channel, state)
            },
            Self::SolutionUpdated(solution) => write!(f, "solution {}", solution),
            Self::AssistanceUpdated { kind } => write!(f, "{} assistance updated", kind),
            Self::Unknown { raw_code } => write!(f, "unknown code {}", raw_code),
        }
    }
}

/// Decodes a raw [Event]. Never fails: anything unrecognized is [Command::Unknown].
pub fn decode(event: &Event) -> Command {
    let unknown = Command::Unknown {
        raw_code: event.code,
    };

    match (event.origin, event.code) {
        (ProducerId::Pipeline | ProducerId::Operator | ProducerId::Ipc, code::STOP) => {
            Command::StopReceiver
        },

        (
            ProducerId::Pipeline | ProducerId::Ipc,
            code::CHANNEL_ACQUISITION_FAILED
            | code::CHANNEL_ACQUISITION_SUCCESS
            | code::CHANNEL_TRACKING_LOST,
        ) => {
            let state = ChannelState::from_code(event.code);
            match (state, <[u8; 2]>::try_from(event.payload.as_slice())) {
                (Some(state), Ok(bytes)) => Command::ChannelStateChanged {
                    channel: u16::from_le_bytes(bytes),
                    state,
                },
                _ => unknown,
            }
        },

        (ProducerId::Pipeline | ProducerId::Ipc, code::SOLUTION_UPDATED) => {
            match Solution::from_payload(&event.payload) {
                Some(solution) => Command::SolutionUpdated(solution),
                None => unknown,
            }
        },

        (ProducerId::Assistance, code::ASSISTANCE_UPDATED) => {
            match event.payload.as_slice() {
                [id] => match AssistanceKind::from_id(*id) {
                    Some(kind) => Command::AssistanceUpdated { kind },
                    None => unknown,
                },
                _ => unknown,
            }
        },

        _ => unknown,
    }
}

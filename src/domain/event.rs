// Brake event domain model
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Wheel {
    FL,
    FR,
    RL,
    RR,
}

impl Wheel {
    /// Wheel code from the first two characters of a channel name.
    pub fn from_channel_name(name: &str) -> Option<Self> {
        let prefix = name.get(..2)?;
        match prefix.to_ascii_lowercase().as_str() {
            "fl" => Some(Self::FL),
            "fr" => Some(Self::FR),
            "rl" => Some(Self::RL),
            "rr" => Some(Self::RR),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::FL => "FL",
            Self::FR => "FR",
            Self::RL => "RL",
            Self::RR => "RR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PositionLabel {
    FrontAxle,
    RearAxle,
    AllFour,
    SingleWheel(Wheel),
    Unknown,
}

impl PositionLabel {
    pub fn from_channels<'a>(channels: impl IntoIterator<Item = &'a str>) -> Self {
        let wheels: BTreeSet<Wheel> = channels
            .into_iter()
            .filter_map(Wheel::from_channel_name)
            .collect();

        let front = wheels.contains(&Wheel::FL) && wheels.contains(&Wheel::FR);
        let rear = wheels.contains(&Wheel::RL) && wheels.contains(&Wheel::RR);
        let any_front = wheels.contains(&Wheel::FL) || wheels.contains(&Wheel::FR);
        let any_rear = wheels.contains(&Wheel::RL) || wheels.contains(&Wheel::RR);

        if front && rear {
            Self::AllFour
        } else if front && !any_rear {
            Self::FrontAxle
        } else if rear && !any_front {
            Self::RearAxle
        } else if wheels.len() == 1 {
            wheels
                .into_iter()
                .next()
                .map(Self::SingleWheel)
                .unwrap_or(Self::Unknown)
        } else {
            Self::Unknown
        }
    }
}

impl fmt::Display for PositionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrontAxle => write!(f, "front axle"),
            Self::RearAxle => write!(f, "rear axle"),
            Self::AllFour => write!(f, "all four"),
            Self::SingleWheel(wheel) => write!(f, "{}", wheel.code()),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Detected brake actuation. Times are seconds relative to the log base time.
///
/// `end_time` is `None` when the peak search region after the start was empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrakeEvent {
    pub start_time: f64,
    pub end_time: Option<f64>,
    pub involved_channels: BTreeSet<String>,
    pub position: PositionLabel,
}

impl BrakeEvent {
    pub fn has_peak(&self) -> bool {
        self.end_time.is_some()
    }
}

/// Recoverable detection non-findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
pub enum NotFound {
    #[error("no rising channels")]
    NoRisingChannels,
    #[error("no start detected")]
    NoStartDetected,
}

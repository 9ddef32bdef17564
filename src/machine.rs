//! Machine identities.
//!
//! A batch is carried out by a coordinating `master` process and a fixed set of
//! numbered workers (`machine_1`, `machine_2`, ...). The numeric index orders
//! machines for layout and picks their tag colour; it has no bearing on event
//! ordering.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::DashError;

const WORKER_PREFIX: &str = "machine_";

/// Origin the backend reports when it cannot attribute a line to a machine
const UNKNOWN: &str = "machine_unknown";

/// A master or numbered worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MachineId {
    Master,
    Worker(u32),
    /// Log lines the backend could not attribute. Has no screen.
    Unknown,
}

impl MachineId {
    /// Layout index: master is 0, workers use their number
    pub fn index(&self) -> Option<u32> {
        match self {
            MachineId::Master => Some(0),
            MachineId::Worker(n) => Some(*n),
            MachineId::Unknown => None,
        }
    }

    /// Whether the backend serves a screenshot for this machine
    pub fn has_screen(&self) -> bool {
        !matches!(self, MachineId::Unknown)
    }

    /// Tag colour for log lines, `hsl(index / 20, 0.5, 0.75)` as RGB. Grey
    /// for unattributed lines.
    pub fn tag_color(&self) -> [u8; 3] {
        match self.index() {
            Some(index) => hsl_to_rgb(index as f64 / 20.0, 0.5, 0.75),
            None => hsl_to_rgb(0.0, 0.0, 0.75),
        }
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineId::Master => write!(f, "master"),
            MachineId::Worker(n) => write!(f, "{}{}", WORKER_PREFIX, n),
            MachineId::Unknown => f.write_str(UNKNOWN),
        }
    }
}

impl FromStr for MachineId {
    type Err = DashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "master" => return Ok(MachineId::Master),
            UNKNOWN => return Ok(MachineId::Unknown),
            _ => {}
        }
        s.strip_prefix(WORKER_PREFIX)
            .and_then(|n| n.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .map(MachineId::Worker)
            .ok_or_else(|| DashError::InvalidMachine(s.to_string()))
    }
}

impl Serialize for MachineId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MachineId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// The static machine set for a backend with `workers` numbered workers
pub fn roster(workers: u32) -> Vec<MachineId> {
    std::iter::once(MachineId::Master)
        .chain((1..=workers).map(MachineId::Worker))
        .collect()
}

// https://gist.github.com/mjackson/5311256
fn hsl_to_rgb(h: f64, s: f64, l: f64) -> [u8; 3] {
    if s == 0.0 {
        let v = (l * 255.0).round() as u8;
        return [v, v, v];
    }

    fn hue_to_rgb(p: f64, q: f64, mut t: f64) -> f64 {
        if t < 0.0 {
            t += 1.0;
        }
        if t > 1.0 {
            t -= 1.0;
        }
        if t < 1.0 / 6.0 {
            return p + (q - p) * 6.0 * t;
        }
        if t < 0.5 {
            return q;
        }
        if t < 2.0 / 3.0 {
            return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
        }
        p
    }

    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;

    [h + 1.0 / 3.0, h, h - 1.0 / 3.0].map(|t| (hue_to_rgb(p, q, t) * 255.0).round() as u8)
}

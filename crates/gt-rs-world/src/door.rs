//! Door link targets, `NAME:x:y`.
//!
//! Only the shape is checked; whether the target world exists is decided when
//! a player walks through the door.

use std::fmt;
use std::str::FromStr;

use crate::error::WorldError;
use crate::registry::normalize_world_name;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoorTarget {
    pub world: String,
    pub x: u32,
    pub y: u32,
}

impl FromStr for DoorTarget {
    type Err = WorldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WorldError::InvalidDoorTarget(s.to_string());
        let mut parts = s.split(':');
        let (Some(name), Some(x), Some(y), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        let world = normalize_world_name(name).map_err(|_| invalid())?;
        let x = x.parse().map_err(|_| invalid())?;
        let y = y.parse().map_err(|_| invalid())?;
        Ok(Self { world, x, y })
    }
}

impl fmt::Display for DoorTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.world, self.x, self.y)
    }
}

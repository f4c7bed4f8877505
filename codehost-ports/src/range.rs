use serde::{Deserialize, Serialize};
use std::fmt;

use crate::allocator::PortError;

/// Lowest port handed out when no range is configured.
pub const DEFAULT_FLOOR: u16 = 10000;
/// Highest port handed out when no range is configured.
pub const DEFAULT_CEILING: u16 = 60999;

/// Inclusive range of host ports the allocator may hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub floor: u16,
    pub ceiling: u16,
}

impl PortRange {
    pub fn parse(range_str: &str) -> Result<Self, PortError> {
        // Validate format: FLOOR-CEILING
        let (floor, ceiling) = range_str
            .trim()
            .split_once('-')
            .ok_or_else(|| PortError::InvalidRange(format!("expected FLOOR-CEILING, got {range_str}")))?;

        let floor: u16 = floor
            .trim()
            .parse()
            .map_err(|_| PortError::InvalidRange(format!("invalid floor port: {floor}")))?;
        let ceiling: u16 = ceiling
            .trim()
            .parse()
            .map_err(|_| PortError::InvalidRange(format!("invalid ceiling port: {ceiling}")))?;

        Self::new(floor, ceiling)
    }

    pub fn new(floor: u16, ceiling: u16) -> Result<Self, PortError> {
        if floor == 0 {
            return Err(PortError::InvalidRange("port 0 cannot be allocated".to_string()));
        }
        if floor > ceiling {
            return Err(PortError::InvalidRange(format!(
                "floor ({floor}) must not exceed ceiling ({ceiling})"
            )));
        }
        Ok(PortRange { floor, ceiling })
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.floor..=self.ceiling).contains(&port)
    }

    pub fn size(&self) -> u32 {
        u32::from(self.ceiling) - u32::from(self.floor) + 1
    }
}

impl Default for PortRange {
    fn default() -> Self {
        PortRange {
            floor: DEFAULT_FLOOR,
            ceiling: DEFAULT_CEILING,
        }
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.floor, self.ceiling)
    }
}

//! Definitions for the ROS2 `std_msgs` package.

use serde::{Deserialize, Serialize};

use super::builtin_interfaces::Time;

/// Standard metadata for higher-level stamped data types.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub stamp: Time,
    pub frame_id: String,
}

//! Definitions for the ROS2 `tf2_msgs` package.

use serde::{Deserialize, Serialize};

use super::geometry_msgs::TransformStamped;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct TFMessage {
    pub transforms: Vec<TransformStamped>,
}

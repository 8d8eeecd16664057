//! Definitions for the ROS2 `nav_msgs` package.

use serde::{Deserialize, Serialize};

use super::{
    geometry_msgs::{PoseWithCovariance, TwistWithCovariance},
    std_msgs::Header,
};

/// An estimate of a position and velocity in free space.
///
/// The pose is given in `header.frame_id`, the twist in `child_frame_id`.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Odometry {
    pub header: Header,
    pub child_frame_id: String,
    pub pose: PoseWithCovariance,
    pub twist: TwistWithCovariance,
}

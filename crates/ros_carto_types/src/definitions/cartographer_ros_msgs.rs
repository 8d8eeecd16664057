//! Definitions for the `cartographer_ros_msgs` package.

use serde::{Deserialize, Serialize};

use super::{geometry_msgs::Pose, std_msgs::Header};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkEntry {
    pub id: String,
    pub tracking_from_landmark_transform: Pose,
    pub translation_weight: f64,
    pub rotation_weight: f64,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkList {
    pub header: Header,
    pub landmarks: Vec<LandmarkEntry>,
}

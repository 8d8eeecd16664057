//! Definitions for the ROS2 `sensor_msgs` package.
//!
//! Based on definitions taken from <https://github.com/ros2/common_interfaces/tree/rolling/sensor_msgs>

use serde::{Deserialize, Serialize};

use super::{
    geometry_msgs::{Quaternion, Vector3},
    std_msgs::Header,
};

/// Single scan from a planar laser range-finder.
///
/// Angles are measured around the positive Z axis (counterclockwise if Z is up),
/// with zero angle forward along the x axis of `header.frame_id`.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserScan {
    pub header: Header,
    pub angle_min: f32,
    pub angle_max: f32,
    pub angle_increment: f32,
    pub time_increment: f32,
    pub scan_time: f32,
    pub range_min: f32,
    pub range_max: f32,
    pub ranges: Vec<f32>,
    pub intensities: Vec<f32>,
}

/// All echoes returned by a laser for one beam.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserEcho {
    pub echoes: Vec<f32>,
}

/// Single scan from a multi-echo planar laser range-finder.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiEchoLaserScan {
    pub header: Header,
    pub angle_min: f32,
    pub angle_max: f32,
    pub angle_increment: f32,
    pub time_increment: f32,
    pub scan_time: f32,
    pub range_min: f32,
    pub range_max: f32,
    pub ranges: Vec<LaserEcho>,
    pub intensities: Vec<LaserEcho>,
}

/// Storage type of a single [`PointField`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PointFieldDatatype {
    Int8 = 1,
    UInt8 = 2,
    Int16 = 3,
    UInt16 = 4,
    Int32 = 5,
    UInt32 = 6,
    Float32 = 7,
    Float64 = 8,
}

impl PointFieldDatatype {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }
}

impl TryFrom<u8> for PointFieldDatatype {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Int8),
            2 => Ok(Self::UInt8),
            3 => Ok(Self::Int16),
            4 => Ok(Self::UInt16),
            5 => Ok(Self::Int32),
            6 => Ok(Self::UInt32),
            7 => Ok(Self::Float32),
            8 => Ok(Self::Float64),
            other => Err(format!("unknown point field datatype {other}")),
        }
    }
}

impl From<PointFieldDatatype> for u8 {
    fn from(value: PointFieldDatatype) -> Self {
        value as Self
    }
}

/// Describes one channel of the point data in a [`PointCloud2`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointField {
    pub name: String,
    pub offset: u32,
    pub datatype: PointFieldDatatype,
    pub count: u32,
}

/// A collection of N-dimensional points with an arbitrary binary layout.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointCloud2 {
    pub header: Header,
    pub height: u32,
    pub width: u32,
    pub fields: Vec<PointField>,
    pub is_bigendian: bool,
    pub point_step: u32,
    pub row_step: u32,
    pub data: Vec<u8>,
    pub is_dense: bool,
}

/// Data from an inertial measurement unit.
///
/// A covariance with `-1` as its first element marks the matching
/// measurement as unavailable.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Imu {
    pub header: Header,
    pub orientation: Quaternion,
    pub orientation_covariance: [f64; 9],
    pub angular_velocity: Vector3,
    pub angular_velocity_covariance: [f64; 9],
    pub linear_acceleration: Vector3,
    pub linear_acceleration_covariance: [f64; 9],
}

/// Status of a GNSS fix.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavSatStatus {
    pub status: i8,
    pub service: u16,
}

impl NavSatStatus {
    pub const STATUS_NO_FIX: i8 = -1;
    pub const STATUS_FIX: i8 = 0;
    pub const STATUS_SBAS_FIX: i8 = 1;
    pub const STATUS_GBAS_FIX: i8 = 2;
}

/// Navigation satellite fix for any GNSS.
///
/// Latitude and longitude are in degrees, altitude in meters above the
/// WGS 84 ellipsoid.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavSatFix {
    pub header: Header,
    pub status: NavSatStatus,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub position_covariance: [f64; 9],
    pub position_covariance_type: u8,
}

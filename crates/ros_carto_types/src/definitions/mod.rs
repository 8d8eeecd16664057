//! ROS message definitions.
//!
//! This module provides `serde`-compatible Rust types for the subset of
//! ROS message definitions the bridge consumes. Field order follows the
//! `.msg` files, which is also the CDR wire order, so the types can be
//! decoded straight from recorded payloads with [`crate::codec`].

pub mod builtin_interfaces;
pub mod cartographer_ros_msgs;
pub mod geometry_msgs;
pub mod nav_msgs;
pub mod sensor_msgs;
pub mod std_msgs;
pub mod tf2_msgs;

//! Feeds recorded ROS sensor messages to a SLAM trajectory builder.
//!
//! Every message is converted into a sensor record expressed in the tracking
//! frame and routed to Rerun sinks per sensor.

pub mod channel;
pub mod cli;
pub mod config;
pub mod handler;
pub mod handlers;
pub mod playback;
pub mod sensor_bridge;
pub mod static_transforms;
pub mod tf_bridge;
pub mod topology;
pub mod worker;

use std::collections::HashMap;
use std::path::PathBuf;

use nalgebra::{Quaternion, Translation3, UnitQuaternion};
use ros_carto_types::{sensor::Rigid3d, ROSTypeName};
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Top level configuration
///
/// Describes the bridge itself, where messages come from, which topics
/// feed which sensors, and where the resulting records are sent.
#[derive(Deserialize, Serialize, Default, Clone, Debug, PartialEq)]
pub struct Config {
    /// Sensor bridge options
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Recorded input
    #[serde(default)]
    pub input: InputConfig,

    /// ROS topics configuration, keyed by sensor id
    #[serde(default)]
    pub topics: HashMap<String, TopicSource>,

    /// Static mounting transforms between frames
    #[serde(default)]
    pub frames: Vec<FrameConfig>,

    /// Rerun SDK streams configuration
    /// The bridge will log records over gRPC directly
    #[serde(default)]
    pub streams: HashMap<String, StreamConfig>,

    #[serde(default)]
    pub db: DBConfig,

    /// Path where config was loaded from.
    #[serde(skip)]
    pub config_paths: Vec<PathBuf>,
}

impl Config {
    pub fn topics(&self) -> impl IntoIterator<Item = (&String, &TopicSource)> {
        let mut topics = self.topics.iter().collect::<Vec<_>>();
        topics.sort_by_key(|(name, _)| *name);
        topics
    }

    pub fn streams(&self) -> impl IntoIterator<Item = (&String, &StreamConfig)> {
        let mut streams = self.streams.iter().collect::<Vec<_>>();
        streams.sort_by_key(|(name, _)| *name);
        streams
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Frame all sensor records are expressed in
    pub tracking_frame: String,

    /// How long to wait for a transform before dropping a message
    pub lookup_transform_timeout_sec: f64,

    /// Number of records each laser scan is split into
    pub num_subdivisions_per_laser_scan: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            tracking_frame: "base_link".to_owned(),
            lookup_transform_timeout_sec: 0.2,
            num_subdivisions_per_laser_scan: 1,
        }
    }
}

impl BridgeConfig {
    /// Validate the bridge configuration
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` if any option is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tracking_frame.trim_start_matches('/').is_empty() {
            return Err(ConfigError::Validation(anyhow::anyhow!(
                "bridge.tracking_frame must not be empty"
            )));
        }
        if !self.lookup_transform_timeout_sec.is_finite() || self.lookup_transform_timeout_sec < 0.0
        {
            return Err(ConfigError::Validation(anyhow::anyhow!(
                "bridge.lookup_transform_timeout_sec must be a non-negative number of seconds"
            )));
        }
        if self.num_subdivisions_per_laser_scan == 0 {
            return Err(ConfigError::Validation(anyhow::anyhow!(
                "bridge.num_subdivisions_per_laser_scan must be at least 1"
            )));
        }
        Ok(())
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct InputConfig {
    /// MCAP recording to play back
    pub bag: Option<PathBuf>,

    /// Topic carrying `tf2_msgs/TFMessage` with static transforms
    pub tf_static_topic: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            bag: None,
            tf_static_topic: "/tf_static".to_owned(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq)]
pub struct TopicSource {
    pub topic: String,

    /// Taken from the recording if not set
    pub ros_type: Option<String>,

    /// Additional settings for the message handler
    #[serde(flatten)]
    pub handler: toml::Table,
}

impl TopicSource {
    /// The configured ROS type, if any.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` if the type name is malformed.
    pub fn ros_type(&self) -> Result<Option<ROSTypeName>, ConfigError> {
        self.ros_type
            .as_deref()
            .map(ROSTypeName::try_from)
            .transpose()
            .map_err(|err| ConfigError::Validation(err.into()))
    }
}

/// A fixed transform placing `child` in `parent`.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct FrameConfig {
    pub parent: String,
    pub child: String,

    /// Meters, x y z
    #[serde(default)]
    pub translation: [f64; 3],

    /// Unit quaternion, x y z w
    #[serde(default = "identity_rotation")]
    pub rotation: [f64; 4],
}

fn identity_rotation() -> [f64; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

impl FrameConfig {
    pub fn parent_from_child(&self) -> Rigid3d {
        let [x, y, z] = self.translation;
        let [qx, qy, qz, qw] = self.rotation;
        Rigid3d::from_parts(
            Translation3::new(x, y, z),
            UnitQuaternion::from_quaternion(Quaternion::new(qw, qx, qy, qz)),
        )
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.parent.is_empty() || self.child.is_empty() {
            return Err(ConfigError::Validation(anyhow::anyhow!(
                "frames need both a parent and a child"
            )));
        }
        let norm = self.rotation.iter().map(|v| v * v).sum::<f64>().sqrt();
        if !norm.is_normal() {
            return Err(ConfigError::Validation(anyhow::anyhow!(
                "rotation of frame {} is not a valid quaternion",
                self.child
            )));
        }
        Ok(())
    }
}

/// Validate every frame definition.
///
/// # Errors
/// Returns `ConfigError::Validation` for the first invalid frame.
pub fn validate_frames(frames: &[FrameConfig]) -> Result<(), ConfigError> {
    frames.iter().try_for_each(FrameConfig::validate)
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    pub inputs: Vec<String>,
    pub url: String,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, Eq)]
pub struct DBConfig {
    pub enabled: Option<bool>,
    #[serde(default)]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub inputs: Vec<String>,
}

impl DBConfig {
    /// The recording file is written if explicitly enabled, or by default
    /// as soon as any input is routed to it.
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(!self.inputs.is_empty())
    }

    /// Validate the DB configuration
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` if the DB configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // If the DB config is disabled, skip validation
        if !self.is_enabled() {
            return Ok(());
        }
        // Check if the data directory is valid
        if !self.data_dir.is_dir() {
            return Err(ConfigError::Validation(anyhow::anyhow!(
                "DB data directory must be a valid directory"
            )));
        }
        Ok(())
    }
}

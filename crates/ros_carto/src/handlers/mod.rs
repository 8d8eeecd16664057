use ros_carto_types::{codec::decode_message, ROSTypeString};
use serde::de::DeserializeOwned;

use crate::handler::{HandlerError, HandlerSettings};

pub mod imu;
pub mod pose;
pub mod rangefinder;

pub(crate) fn decode_payload<T>(
    ros_type: &ROSTypeString<'_>,
    payload: &[u8],
) -> Result<T, HandlerError>
where
    T: DeserializeOwned,
{
    decode_message::<T>(payload).map_err(|err| HandlerError::Decode(ros_type.to_string(), err))
}

/// Settings check for handlers without any settings.
pub(crate) fn reject_settings(
    ros_type: &ROSTypeString<'_>,
    config: &HandlerSettings,
) -> Result<(), HandlerError> {
    if config.0.is_empty() {
        Ok(())
    } else {
        let keys = config.0.keys().cloned().collect::<Vec<_>>().join(", ");
        Err(HandlerError::InvalidConfig(
            ros_type.to_string(),
            anyhow::anyhow!("{ros_type} topics do not accept any settings, found: {keys}"),
        ))
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use ros_carto_types::{
        sensor::{Rigid3d, SensorData},
        trajectory_builder::TrajectoryBuilder,
    };

    use crate::{sensor_bridge::SensorBridge, static_transforms::StaticTransforms};

    pub type Records = Arc<Mutex<Vec<(String, SensorData)>>>;

    struct RecordingBuilder(Records);

    impl TrajectoryBuilder for RecordingBuilder {
        fn add_sensor_data(&mut self, sensor_id: &str, data: SensorData) {
            self.0.lock().push((sensor_id.to_owned(), data));
        }
    }

    /// A bridge tracking `base_link` with `laser`, `imu` and `odom_child`
    /// frames mounted at its origin.
    pub fn bridge() -> (SensorBridge, Records) {
        let tfs = StaticTransforms::new();
        for frame in ["laser", "imu", "odom_child"] {
            tfs.insert("base_link", frame, Rigid3d::identity());
        }
        bridge_with(Arc::new(tfs))
    }

    /// A bridge tracking `base_link` that resolves frames through `tfs`.
    pub fn bridge_with(tfs: Arc<StaticTransforms>) -> (SensorBridge, Records) {
        let records = Records::default();
        let bridge = SensorBridge::new(
            1,
            "base_link",
            0.0,
            tfs,
            Box::new(RecordingBuilder(records.clone())),
        );
        (bridge, records)
    }
}

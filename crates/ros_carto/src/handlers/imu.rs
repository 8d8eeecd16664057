use ros_carto_types::{definitions::sensor_msgs::Imu, ROSTypeString};

use crate::{
    handler::{HandlerCfg, HandlerError, HandlerSettings, MessageHandler},
    handlers::{decode_payload, reject_settings},
    sensor_bridge::SensorBridge,
};

const SENSOR_MSGS_IMU: ROSTypeString<'_> = ROSTypeString("sensor_msgs", "Imu");

/// Feeds `sensor_msgs/Imu` messages to the bridge.
///
/// The IMU frame has to be colocated with the tracking frame.
#[derive(Clone, Debug, Default)]
pub struct ImuHandler;

impl HandlerCfg for ImuHandler {
    fn set_config(&mut self, config: HandlerSettings) -> Result<(), HandlerError> {
        reject_settings(self.ros_type(), &config)
    }
}

impl MessageHandler for ImuHandler {
    fn ros_type(&self) -> &ROSTypeString<'static> {
        &SENSOR_MSGS_IMU
    }

    fn handle(
        &self,
        bridge: &mut SensorBridge,
        sensor_id: &str,
        payload: &[u8],
    ) -> Result<(), HandlerError> {
        let msg = decode_payload::<Imu>(self.ros_type(), payload)?;
        Ok(bridge.handle_imu_message(sensor_id, &msg)?)
    }
}

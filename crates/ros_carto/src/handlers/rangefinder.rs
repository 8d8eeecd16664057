use ros_carto_types::{
    definitions::sensor_msgs::{LaserScan, MultiEchoLaserScan, PointCloud2},
    msg_conversion::PointCloudLayout,
    ROSTypeString,
};
use serde::{Deserialize, Serialize};

use crate::{
    handler::{HandlerCfg, HandlerError, HandlerSettings, MessageHandler},
    handlers::{decode_payload, reject_settings},
    sensor_bridge::SensorBridge,
};

const SENSOR_MSGS_LASER_SCAN: ROSTypeString<'_> = ROSTypeString("sensor_msgs", "LaserScan");
const SENSOR_MSGS_MULTI_ECHO_LASER_SCAN: ROSTypeString<'_> =
    ROSTypeString("sensor_msgs", "MultiEchoLaserScan");
const SENSOR_MSGS_POINTCLOUD2: ROSTypeString<'_> = ROSTypeString("sensor_msgs", "PointCloud2");

#[derive(Clone, Debug, Default)]
pub struct LaserScanHandler;

impl HandlerCfg for LaserScanHandler {
    fn set_config(&mut self, config: HandlerSettings) -> Result<(), HandlerError> {
        reject_settings(self.ros_type(), &config)
    }
}

impl MessageHandler for LaserScanHandler {
    fn ros_type(&self) -> &ROSTypeString<'static> {
        &SENSOR_MSGS_LASER_SCAN
    }

    fn handle(
        &self,
        bridge: &mut SensorBridge,
        sensor_id: &str,
        payload: &[u8],
    ) -> Result<(), HandlerError> {
        let msg = decode_payload::<LaserScan>(self.ros_type(), payload)?;
        Ok(bridge.handle_laser_scan_message(sensor_id, &msg)?)
    }
}

#[derive(Clone, Debug, Default)]
pub struct MultiEchoLaserScanHandler;

impl HandlerCfg for MultiEchoLaserScanHandler {
    fn set_config(&mut self, config: HandlerSettings) -> Result<(), HandlerError> {
        reject_settings(self.ros_type(), &config)
    }
}

impl MessageHandler for MultiEchoLaserScanHandler {
    fn ros_type(&self) -> &ROSTypeString<'static> {
        &SENSOR_MSGS_MULTI_ECHO_LASER_SCAN
    }

    fn handle(
        &self,
        bridge: &mut SensorBridge,
        sensor_id: &str,
        payload: &[u8],
    ) -> Result<(), HandlerError> {
        let msg = decode_payload::<MultiEchoLaserScan>(self.ros_type(), payload)?;
        Ok(bridge.handle_multi_echo_laser_scan_message(sensor_id, &msg)?)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PointCloud2Config {
    /// How per-point times are stored in the cloud.
    #[serde(default)]
    point_cloud_layout: PointCloudLayout,
}

impl PointCloud2Config {
    fn parse(config: HandlerSettings) -> Result<Self, HandlerError> {
        toml::Value::Table(config.0)
            .try_into::<Self>()
            .map_err(|err| {
                HandlerError::InvalidConfig(SENSOR_MSGS_POINTCLOUD2.to_string(), err.into())
            })
    }
}

#[derive(Clone, Debug, Default)]
pub struct PointCloud2Handler {
    config: PointCloud2Config,
}

impl PointCloud2Handler {
    pub fn layout(&self) -> PointCloudLayout {
        self.config.point_cloud_layout
    }
}

impl HandlerCfg for PointCloud2Handler {
    fn set_config(&mut self, config: HandlerSettings) -> Result<(), HandlerError> {
        self.config = PointCloud2Config::parse(config)?;
        Ok(())
    }
}

impl MessageHandler for PointCloud2Handler {
    fn ros_type(&self) -> &ROSTypeString<'static> {
        &SENSOR_MSGS_POINTCLOUD2
    }

    fn handle(
        &self,
        bridge: &mut SensorBridge,
        sensor_id: &str,
        payload: &[u8],
    ) -> Result<(), HandlerError> {
        let msg = decode_payload::<PointCloud2>(self.ros_type(), payload)?;
        Ok(bridge.handle_point_cloud2_message(sensor_id, &msg, self.layout())?)
    }
}

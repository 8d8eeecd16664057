//! Handlers for pose-like inputs: odometry, GNSS fixes and landmarks.

use ros_carto_types::{
    definitions::{
        cartographer_ros_msgs::LandmarkList, nav_msgs::Odometry, sensor_msgs::NavSatFix,
    },
    ROSTypeString,
};

use crate::{
    handler::{HandlerCfg, HandlerError, HandlerSettings, MessageHandler},
    handlers::{decode_payload, reject_settings},
    sensor_bridge::SensorBridge,
};

const NAV_MSGS_ODOMETRY: ROSTypeString<'_> = ROSTypeString("nav_msgs", "Odometry");
const SENSOR_MSGS_NAV_SAT_FIX: ROSTypeString<'_> = ROSTypeString("sensor_msgs", "NavSatFix");
const CARTOGRAPHER_ROS_MSGS_LANDMARK_LIST: ROSTypeString<'_> =
    ROSTypeString("cartographer_ros_msgs", "LandmarkList");

#[derive(Clone, Debug, Default)]
pub struct OdometryHandler;

impl HandlerCfg for OdometryHandler {
    fn set_config(&mut self, config: HandlerSettings) -> Result<(), HandlerError> {
        reject_settings(self.ros_type(), &config)
    }
}

impl MessageHandler for OdometryHandler {
    fn ros_type(&self) -> &ROSTypeString<'static> {
        &NAV_MSGS_ODOMETRY
    }

    fn handle(
        &self,
        bridge: &mut SensorBridge,
        sensor_id: &str,
        payload: &[u8],
    ) -> Result<(), HandlerError> {
        let msg = decode_payload::<Odometry>(self.ros_type(), payload)?;
        Ok(bridge.handle_odometry_message(sensor_id, &msg)?)
    }
}

#[derive(Clone, Debug, Default)]
pub struct NavSatFixHandler;

impl HandlerCfg for NavSatFixHandler {
    fn set_config(&mut self, config: HandlerSettings) -> Result<(), HandlerError> {
        reject_settings(self.ros_type(), &config)
    }
}

impl MessageHandler for NavSatFixHandler {
    fn ros_type(&self) -> &ROSTypeString<'static> {
        &SENSOR_MSGS_NAV_SAT_FIX
    }

    fn handle(
        &self,
        bridge: &mut SensorBridge,
        sensor_id: &str,
        payload: &[u8],
    ) -> Result<(), HandlerError> {
        let msg = decode_payload::<NavSatFix>(self.ros_type(), payload)?;
        Ok(bridge.handle_nav_sat_fix_message(sensor_id, &msg)?)
    }
}

#[derive(Clone, Debug, Default)]
pub struct LandmarkListHandler;

impl HandlerCfg for LandmarkListHandler {
    fn set_config(&mut self, config: HandlerSettings) -> Result<(), HandlerError> {
        reject_settings(self.ros_type(), &config)
    }
}

impl MessageHandler for LandmarkListHandler {
    fn ros_type(&self) -> &ROSTypeString<'static> {
        &CARTOGRAPHER_ROS_MSGS_LANDMARK_LIST
    }

    fn handle(
        &self,
        bridge: &mut SensorBridge,
        sensor_id: &str,
        payload: &[u8],
    ) -> Result<(), HandlerError> {
        let msg = decode_payload::<LandmarkList>(self.ros_type(), payload)?;
        Ok(bridge.handle_landmark_message(sensor_id, &msg)?)
    }
}

#[cfg(test)]
mod tests {
    use ros_carto_types::{
        codec::encode_message,
        definitions::{
            builtin_interfaces::Time,
            cartographer_ros_msgs::LandmarkEntry,
            sensor_msgs::NavSatStatus,
            std_msgs::Header,
        },
        sensor::SensorKind,
    };

    use super::*;
    use crate::handlers::test_util;

    fn header(frame_id: &str) -> Header {
        Header {
            stamp: Time::new(1_700_000_000, 0),
            frame_id: frame_id.into(),
        }
    }

    #[test]
    fn odometry_payload() {
        let (mut bridge, records) = test_util::bridge();
        let msg = Odometry {
            header: header("odom"),
            child_frame_id: "odom_child".into(),
            ..Default::default()
        };
        OdometryHandler
            .handle(&mut bridge, "odom", &encode_message(&msg).unwrap())
            .unwrap();
        assert_eq!(records.lock()[0].1.kind(), SensorKind::Odometry);
    }

    #[test]
    fn nav_sat_fix_payload() {
        let (mut bridge, records) = test_util::bridge();
        let msg = NavSatFix {
            header: header("gps"),
            status: NavSatStatus {
                status: NavSatStatus::STATUS_NO_FIX,
                service: 0,
            },
            ..Default::default()
        };
        NavSatFixHandler
            .handle(&mut bridge, "fix", &encode_message(&msg).unwrap())
            .unwrap();
        assert_eq!(records.lock()[0].1.kind(), SensorKind::FixedFramePose);
    }

    #[test]
    fn landmark_payload() {
        let (mut bridge, records) = test_util::bridge();
        let msg = LandmarkList {
            header: header("base_link"),
            landmarks: vec![LandmarkEntry {
                id: "door".into(),
                ..Default::default()
            }],
        };
        LandmarkListHandler
            .handle(&mut bridge, "landmarks", &encode_message(&msg).unwrap())
            .unwrap();
        let records = records.lock();
        assert_eq!(records[0].0, "landmarks");
        assert_eq!(records[0].1.kind(), SensorKind::Landmark);
    }

    #[test]
    fn truncated_payload() {
        let (mut bridge, _records) = test_util::bridge();
        assert!(matches!(
            OdometryHandler.handle(&mut bridge, "odom", &[0, 1]),
            Err(HandlerError::Decode(..))
        ));
    }
}

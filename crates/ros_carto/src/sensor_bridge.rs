//! Converts ROS sensor messages into sensor records for a trajectory builder.
//!
//! Every record is moved into the tracking frame before it is forwarded.
//! Messages whose frame cannot be resolved at their timestamp are dropped
//! with a warning from the [`TfBridge`].

use std::sync::Arc;

use ahash::{HashMap, HashMapExt as _};
use log::{info, warn};
use nalgebra::Point3;
use ros_carto_types::{
    definitions::{
        cartographer_ros_msgs::LandmarkList,
        nav_msgs::Odometry,
        sensor_msgs::{Imu, LaserScan, MultiEchoLaserScan, NavSatFix, NavSatStatus, PointCloud2},
    },
    msg_conversion::{
        check_no_leading_slash, compute_local_frame_from_lat_long,
        laser_scan_to_point_cloud_with_intensities, lat_long_alt_to_ecef,
        point_cloud2_to_timed_point_cloud, to_landmark_data, to_rigid3d_pose, to_vector3,
        ConversionError, LaserMessage, PointCloudLayout,
    },
    sensor::{
        rigid3d_to_f32, transform_timed_point_cloud, FixedFramePoseData, ImuData, OdometryData,
        PointCloudWithIntensities, Rigid3d, TimedPointCloudData, TimedRangefinderPoint,
    },
    time::{Time, TimeDelta},
    trajectory_builder::TrajectoryBuilder,
};
use thiserror::Error;

use crate::tf_bridge::{LookupTransform, TfBridge};

/// Largest offset between an IMU and the tracking frame that still counts as
/// colocated.
const IMU_COLOCATION_TOLERANCE: f64 = 1e-5;

#[derive(Debug, Error, PartialEq)]
pub enum BridgeError {
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(
        "IMU data claims to not contain linear acceleration measurements by setting \
         linear_acceleration_covariance[0] to -1, but it is required"
    )]
    MissingLinearAcceleration,

    #[error(
        "IMU data claims to not contain angular velocity measurements by setting \
         angular_velocity_covariance[0] to -1, but it is required"
    )]
    MissingAngularVelocity,

    #[error("IMU frame '{frame_id}' is {distance} m away from the tracking frame, it must be colocated")]
    ImuNotColocated { frame_id: String, distance: f64 },

    #[error("range data from '{0}' has a point after the record time ({1} s)")]
    PointAfterRecordTime(String, f32),
}

/// Turns ROS sensor messages into tracking-frame records.
pub struct SensorBridge {
    num_subdivisions_per_laser_scan: usize,
    tf_bridge: TfBridge,
    trajectory_builder: Box<dyn TrajectoryBuilder>,
    sensor_to_previous_subdivision_time: HashMap<String, Time>,
    ecef_to_local_frame: Option<Rigid3d>,
}

impl SensorBridge {
    pub fn new(
        num_subdivisions_per_laser_scan: usize,
        tracking_frame: &str,
        lookup_transform_timeout_sec: f64,
        buffer: Arc<dyn LookupTransform>,
        trajectory_builder: Box<dyn TrajectoryBuilder>,
    ) -> Self {
        Self {
            num_subdivisions_per_laser_scan,
            tf_bridge: TfBridge::new(tracking_frame, lookup_transform_timeout_sec, buffer),
            trajectory_builder,
            sensor_to_previous_subdivision_time: HashMap::new(),
            ecef_to_local_frame: None,
        }
    }

    pub fn tf_bridge(&self) -> &TfBridge {
        &self.tf_bridge
    }

    /// The pose of the tracking frame in the odometry frame.
    ///
    /// Returns `None` if `child_frame_id` cannot be resolved at the message
    /// time.
    pub fn to_odometry_data(&self, msg: &Odometry) -> Option<OdometryData> {
        let time = Time::from_ros(&msg.header.stamp);
        let sensor_to_tracking = self
            .tf_bridge
            .lookup_to_tracking(time, check_no_leading_slash(&msg.child_frame_id))?;
        Some(OdometryData {
            time,
            pose: to_rigid3d_pose(&msg.pose.pose) * sensor_to_tracking.inverse(),
        })
    }

    /// # Errors
    /// Never fails today; the signature matches the other handlers.
    pub fn handle_odometry_message(
        &mut self,
        sensor_id: &str,
        msg: &Odometry,
    ) -> Result<(), BridgeError> {
        if let Some(odometry_data) = self.to_odometry_data(msg) {
            self.trajectory_builder
                .add_sensor_data(sensor_id, odometry_data.into());
        }
        Ok(())
    }

    /// Forward a GNSS fix as a pose in a local frame.
    ///
    /// The local frame is anchored at the first fix this bridge receives.
    ///
    /// # Errors
    /// Never fails today; the signature matches the other handlers.
    pub fn handle_nav_sat_fix_message(
        &mut self,
        sensor_id: &str,
        msg: &NavSatFix,
    ) -> Result<(), BridgeError> {
        let time = Time::from_ros(&msg.header.stamp);
        if msg.status.status == NavSatStatus::STATUS_NO_FIX {
            self.trajectory_builder
                .add_sensor_data(sensor_id, FixedFramePoseData { time, pose: None }.into());
            return Ok(());
        }

        let ecef_to_local_frame = *self.ecef_to_local_frame.get_or_insert_with(|| {
            info!(
                "Using NavSatFix. Setting ecef_to_local_frame with lat = {}, long = {}.",
                msg.latitude, msg.longitude
            );
            compute_local_frame_from_lat_long(msg.latitude, msg.longitude)
        });
        let position = ecef_to_local_frame
            * Point3::from(lat_long_alt_to_ecef(
                msg.latitude,
                msg.longitude,
                msg.altitude,
            ));
        self.trajectory_builder.add_sensor_data(
            sensor_id,
            FixedFramePoseData {
                time,
                pose: Some(Rigid3d::translation(position.x, position.y, position.z)),
            }
            .into(),
        );
        Ok(())
    }

    /// # Errors
    /// Never fails today; the signature matches the other handlers.
    pub fn handle_landmark_message(
        &mut self,
        sensor_id: &str,
        msg: &LandmarkList,
    ) -> Result<(), BridgeError> {
        self.trajectory_builder
            .add_sensor_data(sensor_id, to_landmark_data(msg).into());
        Ok(())
    }

    /// IMU measurements rotated into the tracking frame.
    ///
    /// Returns `Ok(None)` if the IMU frame cannot be resolved at the message
    /// time.
    ///
    /// # Errors
    /// Returns an error if the message lacks linear acceleration or angular
    /// velocity, or if the IMU is not mounted at the tracking frame origin.
    pub fn to_imu_data(&self, msg: &Imu) -> Result<Option<ImuData>, BridgeError> {
        if msg.linear_acceleration_covariance[0] == -1.0 {
            return Err(BridgeError::MissingLinearAcceleration);
        }
        if msg.angular_velocity_covariance[0] == -1.0 {
            return Err(BridgeError::MissingAngularVelocity);
        }

        let time = Time::from_ros(&msg.header.stamp);
        let frame_id = check_no_leading_slash(&msg.header.frame_id);
        let Some(sensor_to_tracking) = self.tf_bridge.lookup_to_tracking(time, frame_id) else {
            return Ok(None);
        };
        let distance = sensor_to_tracking.translation.vector.norm();
        if distance >= IMU_COLOCATION_TOLERANCE {
            return Err(BridgeError::ImuNotColocated {
                frame_id: frame_id.to_owned(),
                distance,
            });
        }
        Ok(Some(ImuData {
            time,
            linear_acceleration: sensor_to_tracking.rotation
                * to_vector3(&msg.linear_acceleration),
            angular_velocity: sensor_to_tracking.rotation * to_vector3(&msg.angular_velocity),
        }))
    }

    /// # Errors
    /// See [`SensorBridge::to_imu_data`].
    pub fn handle_imu_message(&mut self, sensor_id: &str, msg: &Imu) -> Result<(), BridgeError> {
        if let Some(imu_data) = self.to_imu_data(msg)? {
            self.trajectory_builder
                .add_sensor_data(sensor_id, imu_data.into());
        }
        Ok(())
    }

    /// # Errors
    /// Returns an error if the scan geometry is invalid.
    pub fn handle_laser_scan_message(
        &mut self,
        sensor_id: &str,
        msg: &LaserScan,
    ) -> Result<(), BridgeError> {
        self.handle_laser_message(sensor_id, msg)
    }

    /// Only the first echo of each beam is used.
    ///
    /// # Errors
    /// Returns an error if the scan geometry is invalid.
    pub fn handle_multi_echo_laser_scan_message(
        &mut self,
        sensor_id: &str,
        msg: &MultiEchoLaserScan,
    ) -> Result<(), BridgeError> {
        self.handle_laser_message(sensor_id, msg)
    }

    /// Forward a point cloud without subdividing it.
    ///
    /// `layout` selects how per-point times are read from the cloud. A cloud
    /// without points is ignored.
    ///
    /// # Errors
    /// Returns an error if the cloud lacks the fields `layout` needs.
    pub fn handle_point_cloud2_message(
        &mut self,
        sensor_id: &str,
        msg: &PointCloud2,
        layout: PointCloudLayout,
    ) -> Result<(), BridgeError> {
        match point_cloud2_to_timed_point_cloud(msg, layout)? {
            Some((point_cloud, time)) => {
                self.handle_rangefinder(sensor_id, time, &msg.header.frame_id, &point_cloud)
            }
            None => Ok(()),
        }
    }

    fn handle_laser_message<M: LaserMessage>(
        &mut self,
        sensor_id: &str,
        msg: &M,
    ) -> Result<(), BridgeError> {
        let (point_cloud, time) = laser_scan_to_point_cloud_with_intensities(msg)?;
        self.handle_laser_scan(sensor_id, time, &msg.header().frame_id, &point_cloud)
    }

    /// Split a scan into subdivisions and forward each as its own record.
    ///
    /// Subdivisions that are not strictly newer than the previous one from
    /// the same sensor are dropped.
    fn handle_laser_scan(
        &mut self,
        sensor_id: &str,
        time: Time,
        frame_id: &str,
        points: &PointCloudWithIntensities,
    ) -> Result<(), BridgeError> {
        let Some(last) = points.points.last() else {
            return Ok(());
        };
        if last.time > 0.0 {
            return Err(BridgeError::PointAfterRecordTime(
                sensor_id.to_owned(),
                last.time,
            ));
        }

        let num_points = points.points.len();
        let num_subdivisions = self.num_subdivisions_per_laser_scan;
        for i in 0..num_subdivisions {
            let start_index = num_points * i / num_subdivisions;
            let end_index = num_points * (i + 1) / num_subdivisions;
            let Some(subdivision) = points.points.get(start_index..end_index) else {
                continue;
            };
            let Some(subdivision_end) = subdivision.last() else {
                continue;
            };
            let time_to_subdivision_end = subdivision_end.time;
            let subdivision_time =
                time + TimeDelta::from_seconds(f64::from(time_to_subdivision_end));
            if let Some(previous) = self.sensor_to_previous_subdivision_time.get(sensor_id) {
                if *previous >= subdivision_time {
                    warn!(
                        "Ignored subdivision of a LaserScan message from sensor {sensor_id} \
                         because previous subdivision time {previous} is not before current \
                         subdivision time {subdivision_time}"
                    );
                    continue;
                }
            }
            self.sensor_to_previous_subdivision_time
                .insert(sensor_id.to_owned(), subdivision_time);

            let subdivision = subdivision
                .iter()
                .map(|point| TimedRangefinderPoint {
                    position: point.position,
                    time: point.time - time_to_subdivision_end,
                })
                .collect::<Vec<_>>();
            self.handle_rangefinder(sensor_id, subdivision_time, frame_id, &subdivision)?;
        }
        Ok(())
    }

    fn handle_rangefinder(
        &mut self,
        sensor_id: &str,
        time: Time,
        frame_id: &str,
        ranges: &[TimedRangefinderPoint],
    ) -> Result<(), BridgeError> {
        if let Some(last) = ranges.last() {
            if last.time > 0.0 {
                return Err(BridgeError::PointAfterRecordTime(
                    sensor_id.to_owned(),
                    last.time,
                ));
            }
        }
        let Some(sensor_to_tracking) = self
            .tf_bridge
            .lookup_to_tracking(time, check_no_leading_slash(frame_id))
        else {
            return Ok(());
        };
        let sensor_to_tracking = rigid3d_to_f32(&sensor_to_tracking);
        self.trajectory_builder.add_sensor_data(
            sensor_id,
            TimedPointCloudData {
                time,
                origin: sensor_to_tracking.translation.vector,
                ranges: transform_timed_point_cloud(ranges, &sensor_to_tracking),
            }
            .into(),
        );
        Ok(())
    }
}

impl std::fmt::Debug for SensorBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorBridge")
            .field(
                "num_subdivisions_per_laser_scan",
                &self.num_subdivisions_per_laser_scan,
            )
            .field("tf_bridge", &self.tf_bridge)
            .field("ecef_to_local_frame", &self.ecef_to_local_frame)
            .finish_non_exhaustive()
    }
}

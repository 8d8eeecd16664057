//! Conversions from ROS messages to sensor records.
//!
//! Everything here is frame-agnostic: the results are still expressed in the
//! frame of the message header. Moving them into the tracking frame is up to
//! the caller.

use log::error;
use nalgebra::{Quaternion, Rotation3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    definitions::{
        cartographer_ros_msgs::LandmarkList,
        geometry_msgs::{self, Pose, TransformStamped},
        sensor_msgs::{LaserEcho, LaserScan, MultiEchoLaserScan, PointCloud2},
        std_msgs::Header,
    },
    parsers::sensor_msgs::{PointFieldReader, RawPoint},
    sensor::{
        LandmarkData, LandmarkObservation, PointCloudWithIntensities, Rigid3d, TimedPointCloud,
        TimedRangefinderPoint,
    },
    time::{Time, TimeDelta},
};

#[derive(Debug, Error, PartialEq)]
pub enum ConversionError {
    #[error("invalid laser scan: {0}")]
    InvalidLaserScan(String),

    #[error("point cloud is missing the `{0}` field")]
    MissingPointField(&'static str),
}

/// Remove a single leading `/` from a frame id.
///
/// tf2 frame ids must not start with a slash, but many drivers still publish
/// them that way. A frame id of just `/` cannot be fixed and is returned as is.
pub fn check_no_leading_slash(frame_id: &str) -> &str {
    match frame_id.strip_prefix('/') {
        Some("") => {
            error!(
                "The frame_id {frame_id} should not start with a /. See 1.7 in \
                 http://wiki.ros.org/tf2/Migration."
            );
            frame_id
        }
        Some(stripped) => stripped,
        None => frame_id,
    }
}

pub fn to_vector3(vector: &geometry_msgs::Vector3) -> Vector3<f64> {
    Vector3::new(vector.x, vector.y, vector.z)
}

fn to_unit_quaternion(q: &geometry_msgs::Quaternion) -> UnitQuaternion<f64> {
    UnitQuaternion::from_quaternion(Quaternion::new(q.w, q.x, q.y, q.z))
}

pub fn to_rigid3d_pose(pose: &Pose) -> Rigid3d {
    Rigid3d::from_parts(
        Translation3::new(pose.position.x, pose.position.y, pose.position.z),
        to_unit_quaternion(&pose.orientation),
    )
}

pub fn to_rigid3d_transform(transform: &TransformStamped) -> Rigid3d {
    Rigid3d::from_parts(
        Translation3::from(to_vector3(&transform.transform.translation)),
        to_unit_quaternion(&transform.transform.rotation),
    )
}

/// Returns of a single laser beam.
pub trait Echoes {
    /// The first return, if the beam has any.
    fn first_echo(&self) -> Option<f32>;
}

impl Echoes for f32 {
    fn first_echo(&self) -> Option<f32> {
        Some(*self)
    }
}

impl Echoes for LaserEcho {
    fn first_echo(&self) -> Option<f32> {
        self.echoes.first().copied()
    }
}

/// Common view of single and multi-echo planar laser scans.
pub trait LaserMessage {
    type Echo: Echoes;

    fn header(&self) -> &Header;
    fn angle_min(&self) -> f32;
    fn angle_max(&self) -> f32;
    fn angle_increment(&self) -> f32;
    fn time_increment(&self) -> f32;
    fn range_min(&self) -> f32;
    fn range_max(&self) -> f32;
    fn ranges(&self) -> &[Self::Echo];
    fn intensities(&self) -> &[Self::Echo];
}

macro_rules! impl_laser_message {
    ($msg:ty, $echo:ty) => {
        impl LaserMessage for $msg {
            type Echo = $echo;

            fn header(&self) -> &Header {
                &self.header
            }
            fn angle_min(&self) -> f32 {
                self.angle_min
            }
            fn angle_max(&self) -> f32 {
                self.angle_max
            }
            fn angle_increment(&self) -> f32 {
                self.angle_increment
            }
            fn time_increment(&self) -> f32 {
                self.time_increment
            }
            fn range_min(&self) -> f32 {
                self.range_min
            }
            fn range_max(&self) -> f32 {
                self.range_max
            }
            fn ranges(&self) -> &[Self::Echo] {
                &self.ranges
            }
            fn intensities(&self) -> &[Self::Echo] {
                &self.intensities
            }
        }
    };
}

impl_laser_message!(LaserScan, f32);
impl_laser_message!(MultiEchoLaserScan, LaserEcho);

fn validate_laser_message<M: LaserMessage>(msg: &M) -> Result<(), ConversionError> {
    if msg.range_min() < 0.0 || msg.range_min().is_nan() {
        return Err(ConversionError::InvalidLaserScan(format!(
            "range_min {} must not be negative",
            msg.range_min()
        )));
    }
    if msg.range_max() < msg.range_min() || msg.range_max().is_nan() {
        return Err(ConversionError::InvalidLaserScan(format!(
            "range_max {} is below range_min {}",
            msg.range_max(),
            msg.range_min()
        )));
    }
    let ordered = if msg.angle_increment() > 0.0 {
        msg.angle_max() > msg.angle_min()
    } else {
        msg.angle_min() > msg.angle_max()
    };
    if !ordered {
        return Err(ConversionError::InvalidLaserScan(format!(
            "angle range [{}, {}] does not match angle_increment {}",
            msg.angle_min(),
            msg.angle_max(),
            msg.angle_increment()
        )));
    }
    if !msg.intensities().is_empty() && msg.intensities().len() != msg.ranges().len() {
        return Err(ConversionError::InvalidLaserScan(format!(
            "{} intensities for {} ranges",
            msg.intensities().len(),
            msg.ranges().len()
        )));
    }
    Ok(())
}

/// Convert a planar laser scan into a point cloud in the scan frame.
///
/// Returns the points together with the time of the last point. Point times
/// are relative to that time, so the last point has time 0.
///
/// # Errors
/// Returns `ConversionError::InvalidLaserScan` if the scan geometry is
/// inconsistent or an in-range beam has no intensity.
pub fn laser_scan_to_point_cloud_with_intensities<M: LaserMessage>(
    msg: &M,
) -> Result<(PointCloudWithIntensities, Time), ConversionError> {
    validate_laser_message(msg)?;

    let mut point_cloud = PointCloudWithIntensities::default();
    let mut angle = msg.angle_min();
    for (i, echoes) in msg.ranges().iter().enumerate() {
        if let Some(first_echo) = echoes.first_echo() {
            if msg.range_min() <= first_echo && first_echo <= msg.range_max() {
                let rotation = Rotation3::from_axis_angle(&Vector3::z_axis(), angle);
                point_cloud.points.push(TimedRangefinderPoint {
                    position: rotation * (first_echo * Vector3::x()),
                    time: i as f32 * msg.time_increment(),
                });
                let intensity = match msg.intensities().get(i) {
                    Some(echo_intensities) => echo_intensities.first_echo().ok_or_else(|| {
                        ConversionError::InvalidLaserScan(format!("beam {i} has no intensity"))
                    })?,
                    None => 0.0,
                };
                point_cloud.intensities.push(intensity);
            }
        }
        angle += msg.angle_increment();
    }

    let mut timestamp = Time::from_ros(&msg.header().stamp);
    if let Some(last) = point_cloud.points.last() {
        let duration = last.time;
        timestamp = timestamp + TimeDelta::from_seconds(f64::from(duration));
        for point in &mut point_cloud.points {
            point.time -= duration;
        }
    }
    Ok((point_cloud, timestamp))
}

/// How a `PointCloud2` encodes per-point acquisition times.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PointCloudLayout {
    /// No per-point times; every point is stamped with the header time.
    #[default]
    Generic,
    /// `t`: nanoseconds since the header stamp.
    Ouster,
    /// `time`: seconds since the header stamp, which is the first point.
    Velodyne,
    /// `timestamp`: absolute seconds; the header stamp is the last point.
    Robosense,
}

impl PointCloudLayout {
    pub fn time_field(self) -> Option<&'static str> {
        match self {
            Self::Generic => None,
            Self::Ouster => Some("t"),
            Self::Velodyne => Some("time"),
            Self::Robosense => Some("timestamp"),
        }
    }

    /// Scale from the raw time field to seconds.
    fn time_scale(self) -> f64 {
        match self {
            Self::Ouster => 1e-9,
            Self::Generic | Self::Velodyne | Self::Robosense => 1.0,
        }
    }
}

impl std::fmt::Display for PointCloudLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Generic => "generic",
            Self::Ouster => "ouster",
            Self::Velodyne => "velodyne",
            Self::Robosense => "robosense",
        };
        f.write_str(name)
    }
}

/// Convert a `PointCloud2` into timed points in the cloud frame.
///
/// The returned time is the acquisition time of the last point and point
/// times are relative to it. Points with a non-finite coordinate are dropped.
/// Returns `None` for a cloud without points.
///
/// # Errors
/// Returns `ConversionError::MissingPointField` if the cloud lacks a
/// coordinate or the timing field required by `layout`.
pub fn point_cloud2_to_timed_point_cloud(
    msg: &PointCloud2,
    layout: PointCloudLayout,
) -> Result<Option<(TimedPointCloud, Time)>, ConversionError> {
    let reader = match layout.time_field() {
        Some(time_field) => {
            PointFieldReader::try_new(msg, None)
                .ok_or(ConversionError::MissingPointField("x, y, z"))?;
            PointFieldReader::try_new(msg, Some(time_field))
                .ok_or(ConversionError::MissingPointField(time_field))?
        }
        None => PointFieldReader::try_new(msg, None)
            .ok_or(ConversionError::MissingPointField("x, y, z"))?,
    };
    let raw_points = reader.points(&msg.data).collect::<Vec<_>>();
    let Some(last) = raw_points.last() else {
        return Ok(None);
    };

    let scale = layout.time_scale();
    let relative_time = |point: &RawPoint| point.extra.map_or(0.0, |t| t * scale);
    let rel_time_last = relative_time(last);

    let point_cloud = raw_points
        .iter()
        .filter(|point| point.is_finite())
        .map(|point| {
            TimedRangefinderPoint::new(
                point.x as f32,
                point.y as f32,
                point.z as f32,
                (relative_time(point) - rel_time_last) as f32,
            )
        })
        .collect();

    let header_time = Time::from_ros(&msg.header.stamp);
    let time = match layout {
        PointCloudLayout::Ouster | PointCloudLayout::Velodyne => {
            header_time + TimeDelta::from_seconds(rel_time_last)
        }
        PointCloudLayout::Generic | PointCloudLayout::Robosense => header_time,
    };
    Ok(Some((point_cloud, time)))
}

pub fn to_landmark_data(msg: &LandmarkList) -> LandmarkData {
    LandmarkData {
        time: Time::from_ros(&msg.header.stamp),
        landmark_observations: msg
            .landmarks
            .iter()
            .map(|entry| LandmarkObservation {
                id: entry.id.clone(),
                landmark_to_tracking_transform: to_rigid3d_pose(
                    &entry.tracking_from_landmark_transform,
                ),
                translation_weight: entry.translation_weight,
                rotation_weight: entry.rotation_weight,
            })
            .collect(),
    }
}

/// Convert WGS 84 latitude, longitude (degrees) and altitude (meters) to
/// earth-centered, earth-fixed coordinates.
pub fn lat_long_alt_to_ecef(latitude: f64, longitude: f64, altitude: f64) -> Vector3<f64> {
    // Semi-major axis, equator to center.
    const A: f64 = 6_378_137.0;
    const F: f64 = 1.0 / 298.257_223_563;
    // Semi-minor axis, pole to center.
    const B: f64 = A * (1.0 - F);
    const A_SQUARED: f64 = A * A;
    const B_SQUARED: f64 = B * B;
    const E_SQUARED: f64 = (A_SQUARED - B_SQUARED) / A_SQUARED;

    let (sin_phi, cos_phi) = latitude.to_radians().sin_cos();
    let (sin_lambda, cos_lambda) = longitude.to_radians().sin_cos();
    let n = A / (1.0 - E_SQUARED * sin_phi * sin_phi).sqrt();
    Vector3::new(
        (n + altitude) * cos_phi * cos_lambda,
        (n + altitude) * cos_phi * sin_lambda,
        (B_SQUARED / A_SQUARED * n + altitude) * sin_phi,
    )
}

/// A local east-north-up style frame with its origin on the ellipsoid at the
/// given latitude and longitude. The returned transform maps ECEF to local.
pub fn compute_local_frame_from_lat_long(latitude: f64, longitude: f64) -> Rigid3d {
    let translation = lat_long_alt_to_ecef(latitude, longitude, 0.0);
    let rotation =
        UnitQuaternion::from_axis_angle(&Vector3::y_axis(), (latitude - 90.0).to_radians())
            * UnitQuaternion::from_axis_angle(&Vector3::z_axis(), (-longitude).to_radians());
    Rigid3d::from_parts(Translation3::from(rotation * -translation), rotation)
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use nalgebra::Point3;

    use super::*;
    use crate::definitions::{
        builtin_interfaces,
        cartographer_ros_msgs::LandmarkEntry,
        geometry_msgs::{Point, Quaternion as RosQuaternion},
        sensor_msgs::{PointField, PointFieldDatatype},
    };

    fn header(sec: i32) -> Header {
        Header {
            stamp: builtin_interfaces::Time::new(sec, 0),
            frame_id: "/laser".into(),
        }
    }

    fn scan() -> LaserScan {
        LaserScan {
            header: header(100),
            angle_min: 0.0,
            angle_max: 3.0 * FRAC_PI_2,
            angle_increment: FRAC_PI_2,
            time_increment: 0.1,
            range_min: 0.5,
            range_max: 10.0,
            ranges: vec![1.0, 20.0, f32::NAN, 2.0],
            ..Default::default()
        }
    }

    #[test]
    fn leading_slash() {
        assert_eq!(check_no_leading_slash("/laser"), "laser");
        assert_eq!(check_no_leading_slash("laser"), "laser");
        assert_eq!(check_no_leading_slash("//laser"), "/laser");
        assert_eq!(check_no_leading_slash("/"), "/");
        assert_eq!(check_no_leading_slash(""), "");
    }

    #[test]
    fn laser_scan_points() {
        let (cloud, time) = laser_scan_to_point_cloud_with_intensities(&scan()).unwrap();
        assert_eq!(cloud.points.len(), 2);
        assert_eq!(cloud.intensities, vec![0.0, 0.0]);
        assert!((cloud.points[0].position - Vector3::new(1.0, 0.0, 0.0)).norm() < 1e-6);
        assert!((cloud.points[1].position - Vector3::new(0.0, -2.0, 0.0)).norm() < 1e-5);
        assert!((cloud.points[0].time + 0.3).abs() < 1e-6);
        assert_eq!(cloud.points[1].time, 0.0);

        let stamp = Time::from_ros(&builtin_interfaces::Time::new(100, 0));
        assert_eq!(time - stamp, TimeDelta::from_seconds(f64::from(0.3_f32)));
    }

    #[test]
    fn laser_scan_intensities() {
        let mut msg = scan();
        msg.intensities = vec![5.0, 6.0, 7.0, 8.0];
        let (cloud, _) = laser_scan_to_point_cloud_with_intensities(&msg).unwrap();
        assert_eq!(cloud.intensities, vec![5.0, 8.0]);

        msg.intensities = vec![5.0];
        assert!(laser_scan_to_point_cloud_with_intensities(&msg).is_err());
    }

    #[test]
    fn empty_laser_scan_keeps_header_time() {
        let mut msg = scan();
        msg.ranges = vec![50.0, 60.0];
        let (cloud, time) = laser_scan_to_point_cloud_with_intensities(&msg).unwrap();
        assert!(cloud.points.is_empty());
        assert_eq!(time, Time::from_ros(&msg.header.stamp));
    }

    #[test]
    fn invalid_laser_scans() {
        let mut msg = scan();
        msg.range_min = -1.0;
        assert!(laser_scan_to_point_cloud_with_intensities(&msg).is_err());

        let mut msg = scan();
        msg.range_max = 0.1;
        assert!(laser_scan_to_point_cloud_with_intensities(&msg).is_err());

        let mut msg = scan();
        msg.angle_increment = -FRAC_PI_2;
        assert!(laser_scan_to_point_cloud_with_intensities(&msg).is_err());

        let mut msg = scan();
        msg.angle_min = 1.0;
        msg.angle_max = -1.0;
        msg.angle_increment = -0.5;
        assert!(laser_scan_to_point_cloud_with_intensities(&msg).is_ok());
    }

    #[test]
    fn multi_echo_uses_first_echo() {
        let echo = |echoes: &[f32]| LaserEcho {
            echoes: echoes.to_vec(),
        };
        let msg = MultiEchoLaserScan {
            header: header(5),
            angle_min: 0.0,
            angle_max: FRAC_PI_2,
            angle_increment: FRAC_PI_2,
            time_increment: 0.01,
            range_min: 0.0,
            range_max: 30.0,
            ranges: vec![echo(&[3.0, 4.0]), echo(&[])],
            intensities: vec![echo(&[100.0, 1.0]), echo(&[])],
            ..Default::default()
        };
        let (cloud, time) = laser_scan_to_point_cloud_with_intensities(&msg).unwrap();
        assert_eq!(cloud.points.len(), 1);
        assert!((cloud.points[0].position - Vector3::new(3.0, 0.0, 0.0)).norm() < 1e-6);
        assert_eq!(cloud.points[0].time, 0.0);
        assert_eq!(cloud.intensities, vec![100.0]);
        assert_eq!(time, Time::from_ros(&msg.header.stamp));
    }

    fn timed_cloud(
        time_field: &str,
        datatype: PointFieldDatatype,
        points: &[[f64; 4]],
    ) -> PointCloud2 {
        let field = |name: &str, offset: u32, datatype| PointField {
            name: name.into(),
            offset,
            datatype,
            count: 1,
        };
        let mut data = Vec::new();
        for p in points {
            for v in &p[..3] {
                data.extend_from_slice(&(*v as f32).to_le_bytes());
            }
            match datatype {
                PointFieldDatatype::UInt32 => data.extend_from_slice(&(p[3] as u32).to_le_bytes()),
                PointFieldDatatype::Float32 => data.extend_from_slice(&(p[3] as f32).to_le_bytes()),
                _ => data.extend_from_slice(&p[3].to_le_bytes()),
            }
        }
        PointCloud2 {
            header: header(10),
            height: 1,
            width: points.len() as u32,
            fields: vec![
                field("x", 0, PointFieldDatatype::Float32),
                field("y", 4, PointFieldDatatype::Float32),
                field("z", 8, PointFieldDatatype::Float32),
                field(time_field, 12, datatype),
            ],
            point_step: 12 + datatype.size() as u32,
            data,
            ..Default::default()
        }
    }

    #[test]
    fn velodyne_times_relative_to_last_point() {
        let msg = timed_cloud(
            "time",
            PointFieldDatatype::Float32,
            &[[1.0, 0.0, 0.0, 0.0], [f64::NAN, 0.0, 0.0, 0.05], [0.0, 1.0, 0.0, 0.1]],
        );
        let (cloud, time) = point_cloud2_to_timed_point_cloud(&msg, PointCloudLayout::Velodyne)
            .unwrap()
            .unwrap();
        assert_eq!(cloud.len(), 2);
        assert!((cloud[0].time + 0.1).abs() < 1e-6);
        assert_eq!(cloud[1].time, 0.0);
        let stamp = Time::from_ros(&msg.header.stamp);
        assert!(((time - stamp).to_seconds() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn ouster_times_in_nanoseconds() {
        let msg = timed_cloud(
            "t",
            PointFieldDatatype::UInt32,
            &[[1.0, 2.0, 3.0, 0.0], [4.0, 5.0, 6.0, 50_000_000.0]],
        );
        let (cloud, time) = point_cloud2_to_timed_point_cloud(&msg, PointCloudLayout::Ouster)
            .unwrap()
            .unwrap();
        assert!((cloud[0].time + 0.05).abs() < 1e-6);
        assert_eq!(cloud[1].time, 0.0);
        assert_eq!(cloud[1].position, Vector3::new(4.0, 5.0, 6.0));
        let stamp = Time::from_ros(&msg.header.stamp);
        assert!(((time - stamp).to_seconds() - 0.05).abs() < 1e-6);
    }

    #[test]
    fn robosense_keeps_header_stamp() {
        let msg = timed_cloud(
            "timestamp",
            PointFieldDatatype::Float64,
            &[[1.0, 0.0, 0.0, 1_000.25], [2.0, 0.0, 0.0, 1_000.5]],
        );
        let (cloud, time) = point_cloud2_to_timed_point_cloud(&msg, PointCloudLayout::Robosense)
            .unwrap()
            .unwrap();
        assert_eq!(cloud[0].time, -0.25);
        assert_eq!(cloud[1].time, 0.0);
        assert_eq!(time, Time::from_ros(&msg.header.stamp));
    }

    #[test]
    fn generic_and_missing_fields() {
        let msg = timed_cloud("intensity", PointFieldDatatype::Float32, &[[1.0, 1.0, 1.0, 9.0]]);
        let (cloud, time) = point_cloud2_to_timed_point_cloud(&msg, PointCloudLayout::Generic)
            .unwrap()
            .unwrap();
        assert_eq!(cloud, vec![TimedRangefinderPoint::new(1.0, 1.0, 1.0, 0.0)]);
        assert_eq!(time, Time::from_ros(&msg.header.stamp));

        assert_eq!(
            point_cloud2_to_timed_point_cloud(&msg, PointCloudLayout::Velodyne),
            Err(ConversionError::MissingPointField("time"))
        );

        let empty = timed_cloud("time", PointFieldDatatype::Float32, &[]);
        assert_eq!(
            point_cloud2_to_timed_point_cloud(&empty, PointCloudLayout::Velodyne),
            Ok(None)
        );
    }

    #[test]
    fn landmarks() {
        let msg = LandmarkList {
            header: header(7),
            landmarks: vec![LandmarkEntry {
                id: "tag_3".into(),
                tracking_from_landmark_transform: Pose {
                    position: Point {
                        x: 1.0,
                        y: 2.0,
                        z: 0.0,
                    },
                    orientation: RosQuaternion::default(),
                },
                translation_weight: 10.0,
                rotation_weight: 1.0,
            }],
        };
        let data = to_landmark_data(&msg);
        assert_eq!(data.time, Time::from_ros(&msg.header.stamp));
        assert_eq!(data.landmark_observations.len(), 1);
        let observation = &data.landmark_observations[0];
        assert_eq!(observation.id, "tag_3");
        assert_eq!(
            observation.landmark_to_tracking_transform.translation.vector,
            Vector3::new(1.0, 2.0, 0.0)
        );
        assert_eq!(observation.translation_weight, 10.0);
    }

    #[test]
    fn ecef_on_equator() {
        let ecef = lat_long_alt_to_ecef(0.0, 0.0, 0.0);
        assert!((ecef - Vector3::new(6_378_137.0, 0.0, 0.0)).norm() < 1e-6);
        let pole = lat_long_alt_to_ecef(90.0, 0.0, 0.0);
        assert!((pole.z - 6_356_752.314_245).abs() < 1e-3);
    }

    #[test]
    fn local_frame_is_up_aligned() {
        for (lat, lon) in [(0.0, 0.0), (48.137, 11.575), (-33.86, 151.21)] {
            let ecef_to_local = compute_local_frame_from_lat_long(lat, lon);
            let origin = ecef_to_local * Point3::from(lat_long_alt_to_ecef(lat, lon, 0.0));
            assert!(origin.coords.norm() < 1e-6);
            let above = ecef_to_local * Point3::from(lat_long_alt_to_ecef(lat, lon, 10.0));
            assert!((above.coords - Vector3::new(0.0, 0.0, 10.0)).norm() < 1e-6);
        }
    }

    #[test]
    fn rigid_from_pose() {
        let pose = Pose {
            position: Point {
                x: 1.0,
                y: -1.0,
                z: 0.5,
            },
            orientation: RosQuaternion {
                x: 0.0,
                y: 0.0,
                z: std::f64::consts::FRAC_1_SQRT_2,
                w: std::f64::consts::FRAC_1_SQRT_2,
            },
        };
        let rigid = to_rigid3d_pose(&pose);
        let p = rigid * Point3::new(1.0, 0.0, 0.0);
        assert!((p.coords - Vector3::new(1.0, 0.0, 0.5)).norm() < 1e-9);
    }
}

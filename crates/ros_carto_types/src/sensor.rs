//! Sensor records consumed by the trajectory builder.
//!
//! All records are expressed in the tracking frame unless noted otherwise.

use std::fmt::Display;

use nalgebra::{Isometry3, Point3, Quaternion, Translation3, UnitQuaternion, Vector3};

use crate::time::Time;

pub type Rigid3d = Isometry3<f64>;
pub type Rigid3f = Isometry3<f32>;

/// Narrow a transform to single precision for point cloud math.
pub fn rigid3d_to_f32(transform: &Rigid3d) -> Rigid3f {
    let q = transform.rotation.quaternion();
    Rigid3f::from_parts(
        Translation3::from(transform.translation.vector.map(|v| v as f32)),
        UnitQuaternion::new_unchecked(Quaternion::new(
            q.w as f32, q.i as f32, q.j as f32, q.k as f32,
        )),
    )
}

/// A range measurement with its acquisition time.
///
/// `time` is in seconds relative to the time of the record holding the
/// point, so it is zero or negative for every point of a record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedRangefinderPoint {
    pub position: Vector3<f32>,
    pub time: f32,
}

impl TimedRangefinderPoint {
    pub fn new(x: f32, y: f32, z: f32, time: f32) -> Self {
        Self {
            position: Vector3::new(x, y, z),
            time,
        }
    }
}

pub type TimedPointCloud = Vec<TimedRangefinderPoint>;

/// Points of a laser scan together with the intensity of each return.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PointCloudWithIntensities {
    pub points: TimedPointCloud,
    pub intensities: Vec<f32>,
}

/// Apply `transform` to every point position, keeping the point times.
pub fn transform_timed_point_cloud(
    points: &[TimedRangefinderPoint],
    transform: &Rigid3f,
) -> TimedPointCloud {
    points
        .iter()
        .map(|point| TimedRangefinderPoint {
            position: transform.transform_point(&Point3::from(point.position)).coords,
            time: point.time,
        })
        .collect()
}

/// Range data in the tracking frame.
///
/// `origin` is the sensor position in the tracking frame at `time`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedPointCloudData {
    pub time: Time,
    pub origin: Vector3<f32>,
    pub ranges: TimedPointCloud,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuData {
    pub time: Time,
    pub linear_acceleration: Vector3<f64>,
    pub angular_velocity: Vector3<f64>,
}

/// Pose of the tracking frame in the odometry frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OdometryData {
    pub time: Time,
    pub pose: Rigid3d,
}

/// Pose of the tracking frame in a fixed frame (e.g. a local GNSS frame).
///
/// `pose` is `None` when the sensor reported that it has no fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedFramePoseData {
    pub time: Time,
    pub pose: Option<Rigid3d>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkObservation {
    pub id: String,
    pub landmark_to_tracking_transform: Rigid3d,
    pub translation_weight: f64,
    pub rotation_weight: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkData {
    pub time: Time,
    pub landmark_observations: Vec<LandmarkObservation>,
}

/// Any record that can be added to a trajectory.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorData {
    Rangefinder(TimedPointCloudData),
    Imu(ImuData),
    Odometry(OdometryData),
    FixedFramePose(FixedFramePoseData),
    Landmark(LandmarkData),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Rangefinder,
    Imu,
    Odometry,
    FixedFramePose,
    Landmark,
}

impl SensorData {
    pub fn time(&self) -> Time {
        match self {
            Self::Rangefinder(data) => data.time,
            Self::Imu(data) => data.time,
            Self::Odometry(data) => data.time,
            Self::FixedFramePose(data) => data.time,
            Self::Landmark(data) => data.time,
        }
    }

    pub fn kind(&self) -> SensorKind {
        match self {
            Self::Rangefinder(_) => SensorKind::Rangefinder,
            Self::Imu(_) => SensorKind::Imu,
            Self::Odometry(_) => SensorKind::Odometry,
            Self::FixedFramePose(_) => SensorKind::FixedFramePose,
            Self::Landmark(_) => SensorKind::Landmark,
        }
    }
}

impl Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Rangefinder => "rangefinder",
            Self::Imu => "imu",
            Self::Odometry => "odometry",
            Self::FixedFramePose => "fixed frame pose",
            Self::Landmark => "landmark",
        };
        f.write_str(name)
    }
}

impl From<TimedPointCloudData> for SensorData {
    fn from(data: TimedPointCloudData) -> Self {
        Self::Rangefinder(data)
    }
}

impl From<ImuData> for SensorData {
    fn from(data: ImuData) -> Self {
        Self::Imu(data)
    }
}

impl From<OdometryData> for SensorData {
    fn from(data: OdometryData) -> Self {
        Self::Odometry(data)
    }
}

impl From<FixedFramePoseData> for SensorData {
    fn from(data: FixedFramePoseData) -> Self {
        Self::FixedFramePose(data)
    }
}

impl From<LandmarkData> for SensorData {
    fn from(data: LandmarkData) -> Self {
        Self::Landmark(data)
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::FRAC_PI_2;

    use super::*;

    #[test]
    fn transform_keeps_point_times() {
        let transform = rigid3d_to_f32(&Rigid3d::new(
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::z() * FRAC_PI_2,
        ));
        let points = vec![
            TimedRangefinderPoint::new(1.0, 0.0, 0.0, -0.5),
            TimedRangefinderPoint::new(0.0, 1.0, 0.0, 0.0),
        ];
        let transformed = transform_timed_point_cloud(&points, &transform);
        assert_eq!(transformed.len(), 2);
        assert!((transformed[0].position - Vector3::new(1.0, 3.0, 3.0)).norm() < 1e-6);
        assert!((transformed[1].position - Vector3::new(0.0, 2.0, 3.0)).norm() < 1e-6);
        assert_eq!(transformed[0].time, -0.5);
        assert_eq!(transformed[1].time, 0.0);
    }

    #[test]
    fn narrowing_preserves_transform() {
        let transform = Rigid3d::new(Vector3::new(0.5, -0.25, 2.0), Vector3::new(0.1, 0.2, 0.3));
        let narrowed = rigid3d_to_f32(&transform);
        let p = Vector3::new(1.0, 2.0, 3.0);
        let expected = transform * Point3::from(p);
        let actual = narrowed * Point3::from(p.map(|v| v as f32));
        assert!((actual.coords.map(f64::from) - expected.coords).norm() < 1e-5);
    }

    #[test]
    fn sensor_data_time_and_kind() {
        let data = SensorData::from(ImuData {
            time: Time::from_universal(42),
            linear_acceleration: Vector3::z() * 9.81,
            angular_velocity: Vector3::zeros(),
        });
        assert_eq!(data.time(), Time::from_universal(42));
        assert_eq!(data.kind(), SensorKind::Imu);
        assert_eq!(data.kind().to_string(), "imu");
    }
}

use crate::sensor::SensorData;

/// The SLAM back end that consumes sensor records.
///
/// Records arrive in the tracking frame. For a given `sensor_id` they arrive
/// in non-decreasing time order as far as the bridge can guarantee it; laser
/// scan subdivisions that would go back in time are dropped before they get
/// here.
pub trait TrajectoryBuilder: Send {
    fn add_sensor_data(&mut self, sensor_id: &str, data: SensorData);
}

impl<T: TrajectoryBuilder + ?Sized> TrajectoryBuilder for Box<T> {
    fn add_sensor_data(&mut self, sensor_id: &str, data: SensorData) {
        (**self).add_sensor_data(sensor_id, data);
    }
}

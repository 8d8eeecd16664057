use std::sync::Arc;

use ahash::HashMap;
use log::{error, trace};
use ros_carto_types::{sensor::SensorData, trajectory_builder::TrajectoryBuilder};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// A sensor record in the tracking frame, tagged with its sensor id.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorRecord {
    pub sensor_id: Arc<str>,
    pub data: SensorData,
}

#[derive(Clone, Default)]
pub struct RecordSender {
    pub tx: Vec<UnboundedSender<Arc<SensorRecord>>>,
}

impl RecordSender {
    /// Send a record to every connected sink.
    pub fn send(&self, record: &Arc<SensorRecord>) {
        for tx in &self.tx {
            if let Err(err) = tx.send(record.clone()) {
                error!("Failed to send {} record: {err}", record.data.kind());
            }
        }
    }
}

pub struct RecordReceiver {
    pub rx: UnboundedReceiver<Arc<SensorRecord>>,
}

/// Trajectory builder that routes records to sink channels by sensor id.
///
/// Records from sensors without a route are dropped.
#[derive(Clone, Default)]
pub struct ChannelTrajectoryBuilder {
    routes: HashMap<String, RecordSender>,
}

impl ChannelTrajectoryBuilder {
    pub fn new(routes: HashMap<String, RecordSender>) -> Self {
        Self { routes }
    }
}

impl TrajectoryBuilder for ChannelTrajectoryBuilder {
    fn add_sensor_data(&mut self, sensor_id: &str, data: SensorData) {
        match self.routes.get(sensor_id) {
            Some(sender) => sender.send(&Arc::new(SensorRecord {
                sensor_id: Arc::from(sensor_id),
                data,
            })),
            None => trace!("No sink for sensor {sensor_id}, dropping {} record", data.kind()),
        }
    }
}

use std::path::PathBuf;

use log::{debug, error, trace};
use ros_carto_types::{
    sensor::{FixedFramePoseData, ImuData, LandmarkData, OdometryData, Rigid3d, SensorData},
    ROSTypeName,
};
use stream_cancel::Tripwire;

use crate::{
    channel::{RecordReceiver, SensorRecord},
    config::{DBConfig, StreamConfig, TopicSource},
    handler::{HandlerBuilder, HandlerError, HandlerRegistry, HandlerSettings, MessageHandler},
    sensor_bridge::SensorBridge,
};

/// Timeline all records are logged on, in the sensor clock.
pub const SENSOR_TIMELINE: &str = "sensor_time";

/// Feeds the messages of one topic to the sensor bridge.
///
/// The handler is built eagerly when the topic configures its ROS type.
/// Otherwise it is built from the type reported by the recording the first
/// time a message arrives.
pub struct TopicSubscriber {
    sensor_id: String,
    topic: String,
    ros_type: Option<ROSTypeName>,
    settings: HandlerSettings,
    handler: Option<Box<dyn MessageHandler>>,
}

impl TopicSubscriber {
    /// Create a new subscriber for a configured topic.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured ROS type is malformed or has no
    /// handler, or if the handler rejects the topic settings.
    pub fn new(
        sensor_id: &str,
        config: &TopicSource,
        registry: &HandlerRegistry,
    ) -> anyhow::Result<Self> {
        let ros_type = config.ros_type()?;
        let settings = HandlerSettings(config.handler.clone());
        let handler = match &ros_type {
            Some(ros_type) => {
                debug!(
                    "Creating subscriber for topic '{}' with ROS type '{ros_type}' as sensor '{sensor_id}'",
                    config.topic
                );
                Some(build_handler(registry, ros_type.clone(), settings.clone())?)
            }
            None => None,
        };

        Ok(Self {
            sensor_id: sensor_id.to_owned(),
            topic: config.topic.clone(),
            ros_type,
            settings,
            handler,
        })
    }

    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The message type in use, once known.
    pub fn ros_type(&self) -> Option<&ROSTypeName> {
        self.ros_type.as_ref()
    }

    /// Decode one message and hand it to the bridge.
    ///
    /// `schema_name` is the message type recorded with the message. It is only
    /// used while no handler has been built yet.
    ///
    /// # Errors
    ///
    /// Returns a `HandlerError` if no handler can be built for the message
    /// type, the payload cannot be decoded, or the bridge rejects it.
    pub fn handle(
        &mut self,
        bridge: &mut SensorBridge,
        registry: &HandlerRegistry,
        schema_name: Option<&str>,
        payload: &[u8],
    ) -> Result<(), HandlerError> {
        let handler = match self.handler.take() {
            Some(handler) => handler,
            None => {
                let ros_type = schema_name
                    .and_then(|name| ROSTypeName::try_from(name).ok())
                    .ok_or_else(|| {
                        HandlerError::UnsupportedType(
                            schema_name.unwrap_or("<unknown>").to_owned(),
                        )
                    })?;
                debug!(
                    "Topic '{}' carries ROS type '{ros_type}', using it for sensor '{}'",
                    self.topic, self.sensor_id
                );
                let handler = build_handler(registry, ros_type.clone(), self.settings.clone())?;
                self.ros_type = Some(ros_type);
                handler
            }
        };
        let handler = self.handler.insert(handler);
        handler.handle(bridge, &self.sensor_id, payload)
    }
}

fn build_handler(
    registry: &HandlerRegistry,
    ros_type: ROSTypeName,
    settings: HandlerSettings,
) -> Result<Box<dyn MessageHandler>, HandlerError> {
    HandlerBuilder::new_with_registry(registry)
        .ros_type(ros_type)
        .config(settings)
        .build()
}

pub struct GRPCSinkWorker {
    address: String,
    rec: rerun::RecordingStream,
}

impl GRPCSinkWorker {
    /// Create a worker that sends data to a gRPC Rerun server.
    ///
    /// # Errors
    /// Returns an error if the connection to the gRPC server cannot be established.
    pub fn new(config: &StreamConfig) -> anyhow::Result<Self> {
        let rec = rerun::RecordingStreamBuilder::new("ros_carto")
            .connect_grpc_opts(config.url.clone())?;

        Ok(Self {
            address: config.url.clone(),
            rec,
        })
    }

    pub fn run(&self, channel: RecordReceiver, shutdown: Tripwire) -> tokio::task::JoinHandle<()> {
        let shared_rec = self.rec.clone();
        tokio::spawn(run_sink_worker("gRPC", shared_rec, channel, shutdown))
    }
}

impl Drop for GRPCSinkWorker {
    fn drop(&mut self) {
        debug!("Shutting down gRPC sink to {}", self.address);
        if let Err(err) = self.rec.flush_blocking() {
            error!("Failed to flush gRPC recording stream: {err}");
        }
    }
}

pub struct DBSinkWorker {
    recording_file: PathBuf,
    rec: rerun::RecordingStream,
}

impl DBSinkWorker {
    /// Create a worker that saves data to files in a local directory
    ///
    /// # Errors
    /// Returns an error if the recording stream cannot be created.
    pub fn new(config: &DBConfig) -> anyhow::Result<Self> {
        let store_id = rerun::StoreId::random(rerun::StoreKind::Recording, "ros_carto");
        let file_name = format!("{}_{}.rrd", "ros_carto", store_id.recording_id().as_str());
        let recording_file = config.data_dir.clone().join(file_name);
        let rec = rerun::RecordingStreamBuilder::new("ros_carto")
            .recording_id(store_id.recording_id().clone())
            .save(recording_file.clone())?;

        Ok(Self {
            recording_file,
            rec,
        })
    }

    pub fn recording_file(&self) -> &PathBuf {
        &self.recording_file
    }

    pub fn run(&self, channel: RecordReceiver, shutdown: Tripwire) -> tokio::task::JoinHandle<()> {
        let shared_rec = self.rec.clone();
        tokio::spawn(run_sink_worker("DB", shared_rec, channel, shutdown))
    }
}

impl Drop for DBSinkWorker {
    fn drop(&mut self) {
        debug!("Closing recording {}", self.recording_file.display());
        if let Err(err) = self.rec.flush_blocking() {
            error!("Failed to flush recording file: {err}");
        }
    }
}

async fn run_sink_worker(
    name: &'static str,
    rec_stream: rerun::RecordingStream,
    mut channel: RecordReceiver,
    mut shutdown: Tripwire,
) {
    loop {
        tokio::select! {
            record = channel.rx.recv() => {
                let Some(record) = record else {
                    debug!("All inputs of the {name} sink closed");
                    break;
                };
                if let Err(err) = log_record(&rec_stream, &record) {
                    error!("Failed to log {} record from {}: {err}", record.data.kind(), record.sensor_id);
                }
            }
            _ = &mut shutdown => {
                debug!("Shutting down {name} sink worker");
                break;
            }
        }
    }
}

/// Log one record on the sensor timeline under `sensors/<sensor id>`.
///
/// # Errors
/// Returns the recording stream error if logging fails.
pub fn log_record(
    rec_stream: &rerun::RecordingStream,
    record: &SensorRecord,
) -> Result<(), rerun::RecordingStreamError> {
    let entity_path = format!("sensors/{}", record.sensor_id);
    rec_stream.set_timestamp_nanos_since_epoch(SENSOR_TIMELINE, record.data.time().to_unix_nanos());
    match &record.data {
        SensorData::Rangefinder(data) => {
            rec_stream.log(
                entity_path.as_str(),
                &rerun::Points3D::new(
                    data.ranges
                        .iter()
                        .map(|point| [point.position.x, point.position.y, point.position.z]),
                ),
            )?;
            rec_stream.log(
                format!("{entity_path}/origin"),
                &rerun::Points3D::new([[data.origin.x, data.origin.y, data.origin.z]]),
            )
        }
        SensorData::Imu(data) => log_imu(rec_stream, &entity_path, data),
        SensorData::Odometry(OdometryData { pose, .. })
        | SensorData::FixedFramePose(FixedFramePoseData {
            pose: Some(pose), ..
        }) => rec_stream.log(entity_path, &to_transform3d(pose)),
        SensorData::FixedFramePose(FixedFramePoseData { pose: None, .. }) => {
            trace!("No fix from {}", record.sensor_id);
            Ok(())
        }
        SensorData::Landmark(data) => log_landmarks(rec_stream, &entity_path, data),
    }
}

fn log_imu(
    rec_stream: &rerun::RecordingStream,
    entity_path: &str,
    data: &ImuData,
) -> Result<(), rerun::RecordingStreamError> {
    let to_array = |v: &nalgebra::Vector3<f64>| [v.x as f32, v.y as f32, v.z as f32];
    rec_stream.log(
        format!("{entity_path}/linear_acceleration"),
        &rerun::Arrows3D::from_vectors([to_array(&data.linear_acceleration)]),
    )?;
    rec_stream.log(
        format!("{entity_path}/angular_velocity"),
        &rerun::Arrows3D::from_vectors([to_array(&data.angular_velocity)]),
    )
}

fn log_landmarks(
    rec_stream: &rerun::RecordingStream,
    entity_path: &str,
    data: &LandmarkData,
) -> Result<(), rerun::RecordingStreamError> {
    let positions = data.landmark_observations.iter().map(|observation| {
        let t = observation.landmark_to_tracking_transform.translation.vector;
        [t.x as f32, t.y as f32, t.z as f32]
    });
    let labels = data
        .landmark_observations
        .iter()
        .map(|observation| observation.id.clone());
    rec_stream.log(
        entity_path,
        &rerun::Points3D::new(positions).with_labels(labels),
    )
}

fn to_transform3d(pose: &Rigid3d) -> rerun::Transform3D {
    let t = pose.translation.vector;
    let q = pose.rotation.quaternion();
    rerun::Transform3D::from_translation_rotation(
        [t.x as f32, t.y as f32, t.z as f32],
        rerun::Quaternion::from_xyzw([q.i as f32, q.j as f32, q.k as f32, q.w as f32]),
    )
}

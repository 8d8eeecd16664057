use std::{collections::BTreeMap, fmt::Display};

use ahash::{HashMap, HashMapExt as _, HashSet, HashSetExt as _};
use log::{debug, error, info};
use stream_cancel::{Trigger, Tripwire};
use thiserror::Error;
use tokio::{sync::mpsc::unbounded_channel, task::JoinHandle};

use crate::{
    channel::{ChannelTrajectoryBuilder, RecordReceiver, RecordSender},
    config::{defs::Config, DBConfig, StreamConfig, TopicSource},
    handler::HandlerRegistry,
    worker::{DBSinkWorker, GRPCSinkWorker, TopicSubscriber},
};

#[derive(Error, Debug)]
pub enum TopologyConfigError {
    #[error("Duplicate component ID found: {0}")]
    DuplicateID(String),

    #[error("Duplicate subscription to ROS topic {0}")]
    DuplicateTopic(String),

    #[error("Component {0} cannot define itself as an input")]
    SelfReference(ComponentID),

    #[error("{0} lists unknown input '{1}'")]
    UnknownInput(ComponentID, String),

    #[error("Component {0} failed to initialize: {1:#}")]
    InitializationError(ComponentID, #[source] anyhow::Error),
}

/// Configuration describing the flow of records from ROS topics to Rerun.
///
/// This is derived from a Config struct.
#[derive(Debug)]
pub struct TopologyConfig {
    topic_subscriptions: BTreeMap<ComponentID, TopicSource>,
    grpc_sinks: BTreeMap<ComponentID, String>,
    db_sink: Option<DBConfig>,
    edges: BTreeMap<ComponentID, Vec<ComponentID>>,
}

impl TopologyConfig {
    /// Validate the topology configuration.
    ///
    /// # Errors
    ///
    /// May return several different errors in `TopologyConfigError`
    /// if it detects any issues with the topology before attempting to
    /// apply it.
    pub fn validate(&self) -> Result<(), TopologyConfigError> {
        self.check_duplicate_ids()?;
        self.check_duplicate_topics()?;
        self.check_invalid_edges()?;
        Ok(())
    }

    fn check_duplicate_ids(&self) -> Result<(), TopologyConfigError> {
        let mut seen = HashSet::new();
        self.topic_subscriptions
            .keys()
            .chain(self.grpc_sinks.keys())
            .try_for_each(|k| match k {
                ComponentID::GRPCSink(name) | ComponentID::TopicSubscriber(name) => {
                    if seen.insert(name) {
                        Ok(())
                    } else {
                        Err(TopologyConfigError::DuplicateID(name.to_owned()))
                    }
                }
                ComponentID::DBSink => Ok(()),
            })
    }

    fn check_duplicate_topics(&self) -> Result<(), TopologyConfigError> {
        let mut seen = HashSet::new();
        for source in self.topic_subscriptions.values() {
            if !seen.insert(source.topic.as_str()) {
                return Err(TopologyConfigError::DuplicateTopic(source.topic.clone()));
            }
        }
        Ok(())
    }

    fn check_invalid_edges(&self) -> Result<(), TopologyConfigError> {
        for (sink, sources) in &self.edges {
            if let Some(source) = sources.iter().find(|source| *source == sink) {
                return Err(TopologyConfigError::SelfReference(source.clone()));
            }
        }
        Ok(())
    }

    /// Sinks fed by the given component.
    fn sinks_of<'a>(&'a self, id: &'a ComponentID) -> impl Iterator<Item = &'a ComponentID> {
        self.edges
            .iter()
            .filter(move |(_, inputs)| inputs.contains(id))
            .map(|(sink, _)| sink)
    }
}

impl Display for TopologyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (id, source) in &self.topic_subscriptions {
            let ros_type = source.ros_type.as_deref().unwrap_or("<from recording>");
            let sinks = self.sinks_of(id).map(ToString::to_string).collect::<Vec<_>>();
            writeln!(f, "{id}: {} [{ros_type}]", source.topic)?;
            if sinks.is_empty() {
                writeln!(f, "  -> (not recorded)")?;
            }
            for sink in sinks {
                writeln!(f, "  -> {sink}")?;
            }
        }
        for (id, url) in &self.grpc_sinks {
            writeln!(f, "{id}: {url}")?;
        }
        if let Some(db) = &self.db_sink {
            writeln!(f, "{}: {}", ComponentID::DBSink, db.data_dir.display())?;
        }
        Ok(())
    }
}

/// Parse the topology configuration from the given config.
///
/// # Errors
/// Returns a `TopologyConfigError` if the configuration is invalid.
pub fn parse_topology_config(config: &Config) -> Result<TopologyConfig, TopologyConfigError> {
    let mut topic_subscriptions = BTreeMap::new();
    let mut grpc_sinks = BTreeMap::new();
    let mut edges: BTreeMap<ComponentID, Vec<ComponentID>> = BTreeMap::new();

    for (name, source) in config.topics() {
        let source_id = ComponentID::TopicSubscriber(name.clone());
        topic_subscriptions.insert(source_id, source.clone());
    }

    let resolve_input = |sink: &ComponentID, input: &String| {
        let source_id = ComponentID::TopicSubscriber(input.clone());
        if topic_subscriptions.contains_key(&source_id) {
            Ok(source_id)
        } else if config.streams.contains_key(input) {
            Err(TopologyConfigError::SelfReference(ComponentID::GRPCSink(
                input.clone(),
            )))
        } else {
            Err(TopologyConfigError::UnknownInput(sink.clone(), input.clone()))
        }
    };

    // A single database sink, only when enabled
    let db_sink = if config.db.is_enabled() {
        let db_inputs = config
            .db
            .inputs
            .iter()
            .map(|input| resolve_input(&ComponentID::DBSink, input))
            .collect::<Result<Vec<_>, _>>()?;
        edges.insert(ComponentID::DBSink, db_inputs);
        Some(config.db.clone())
    } else {
        None
    };

    // Setup gRPC sinks
    for (name, stream) in config.streams() {
        let sink_id = ComponentID::GRPCSink(name.clone());
        grpc_sinks.insert(sink_id.clone(), stream.url.clone());

        // Connect appropriate sources to this sink
        let inputs = stream
            .inputs
            .iter()
            .map(|input| resolve_input(&sink_id, input))
            .collect::<Result<Vec<_>, _>>()?;
        edges.insert(sink_id, inputs);
    }

    let topo_cfg = TopologyConfig {
        topic_subscriptions,
        grpc_sinks,
        db_sink,
        edges,
    };
    topo_cfg.validate()?;

    Ok(topo_cfg)
}

/// Subscribers and record routes produced by a running topology.
pub struct TopicRoutes {
    /// Subscribers keyed by ROS topic.
    pub subscribers: BTreeMap<String, TopicSubscriber>,

    /// Sends the bridge output to the sinks of each sensor.
    pub trajectory_builder: ChannelTrajectoryBuilder,
}

/// The state of a running topology.
#[derive(Default)]
pub struct TopologyState {
    grpc_sinks: HashMap<ComponentID, GRPCSinkWorker>,
    db_sink: Option<DBSinkWorker>,
    worker_handles: Vec<JoinHandle<()>>,
    shutdown_trigger: Option<Trigger>,
}

impl TopologyState {
    /// Start the sinks of a topology and create the subscribers feeding them.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a `TopologyConfigError` if all or part of the configuration
    /// fails to initialize and start running.
    pub fn apply_config(
        &mut self,
        config: &TopologyConfig,
        registry: &HandlerRegistry,
    ) -> Result<TopicRoutes, TopologyConfigError> {
        let (shutdown_trigger, shutdown) = Tripwire::new();
        self.shutdown_trigger = Some(shutdown_trigger);

        let mut senders = BTreeMap::new();
        let mut rx_map = HashMap::new();
        for id in config.edges.keys() {
            let (tx, rx) = unbounded_channel();
            senders.insert(id.clone(), tx);
            rx_map.insert(id.clone(), RecordReceiver { rx });
        }

        // Subscribers and the sinks of their sensors
        let mut subscribers = BTreeMap::new();
        let mut routes = HashMap::new();
        for (id, source) in &config.topic_subscriptions {
            let ComponentID::TopicSubscriber(sensor_id) = id else {
                continue;
            };
            let subscriber = TopicSubscriber::new(sensor_id, source, registry)
                .map_err(|err| TopologyConfigError::InitializationError(id.clone(), err))?;
            subscribers.insert(source.topic.clone(), subscriber);

            let tx = config
                .sinks_of(id)
                .filter_map(|sink| senders.get(sink).cloned())
                .collect::<Vec<_>>();
            if !tx.is_empty() {
                routes.insert(sensor_id.clone(), RecordSender { tx });
            }
        }
        // Receivers close once the last sender is dropped with the bridge
        drop(senders);

        for (id, url) in &config.grpc_sinks {
            let worker = GRPCSinkWorker::new(&StreamConfig {
                url: url.clone(),
                inputs: vec![],
            })
            .map_err(|err| TopologyConfigError::InitializationError(id.clone(), err))?;
            if let Some(rx_channel) = rx_map.remove(id) {
                self.worker_handles
                    .push(worker.run(rx_channel, shutdown.clone()));
            }
            info!("Streaming to {url}");
            self.grpc_sinks.insert(id.clone(), worker);
        }

        if let Some(db_config) = &config.db_sink {
            let worker = DBSinkWorker::new(db_config)
                .map_err(|err| TopologyConfigError::InitializationError(ComponentID::DBSink, err))?;
            if let Some(rx_channel) = rx_map.remove(&ComponentID::DBSink) {
                self.worker_handles
                    .push(worker.run(rx_channel, shutdown.clone()));
            }
            info!("Recording to {}", worker.recording_file().display());
            self.db_sink = Some(worker);
        }

        debug!("Applied topology config {config:?}");
        Ok(TopicRoutes {
            subscribers,
            trajectory_builder: ChannelTrajectoryBuilder::new(routes),
        })
    }

    /// Stop all sink workers, dropping records they have not logged yet.
    pub fn shutdown(&mut self) {
        if let Some(trigger) = self.shutdown_trigger.take() {
            trigger.cancel();
        }
    }

    /// Wait for the sink workers to finish, then flush and close the sinks.
    ///
    /// Workers finish once every record sender is dropped, or after
    /// [`Self::shutdown`].
    pub async fn join(&mut self) {
        for handle in self.worker_handles.drain(..) {
            if let Err(err) = handle.await {
                error!("Sink worker failed: {err}");
            }
        }
        self.grpc_sinks.clear();
        self.db_sink = None;
    }
}

/// Unique identifier for a component in the system.
///
/// The topology uses these identifiers to route records
/// from inputs to sinks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentID {
    TopicSubscriber(String),
    GRPCSink(String),
    DBSink,
}

impl Display for ComponentID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TopicSubscriber(name) => write!(f, "Sensor '{name}'"),
            Self::GRPCSink(name) => write!(f, "Rerun SDK stream '{name}'"),
            Self::DBSink => write!(f, "Database"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use ros_carto_types::{
        sensor::{ImuData, SensorData},
        time::Time,
        trajectory_builder::TrajectoryBuilder as _,
    };

    use super::*;
    use crate::config;

    fn topic(topic: &str, ros_type: &str) -> config::TopicSource {
        config::TopicSource {
            topic: topic.into(),
            ros_type: Some(ros_type.into()),
            ..Default::default()
        }
    }

    fn stream(inputs: &[&str]) -> config::StreamConfig {
        config::StreamConfig {
            url: "rerun+http://127.0.0.1:9876/proxy".into(),
            inputs: inputs.iter().map(|input| (*input).to_owned()).collect(),
        }
    }

    #[test]
    fn default_topology() {
        let cfg = config::Config::default();
        let topology = parse_topology_config(&cfg);
        assert!(topology.is_ok());
    }

    #[test]
    fn valid_topology() {
        let cfg = config::Config {
            topics: HashMap::from([
                ("scan".into(), topic("/scan", "sensor_msgs/msg/LaserScan")),
                ("imu".into(), topic("/imu", "sensor_msgs/msg/Imu")),
            ]),
            streams: HashMap::from([("viewer".into(), stream(&["scan"]))]),
            ..Default::default()
        };
        let topology = parse_topology_config(&cfg).unwrap();
        let text = topology.to_string();
        assert!(text.contains("Sensor 'scan': /scan [sensor_msgs/msg/LaserScan]"));
        assert!(text.contains("-> Rerun SDK stream 'viewer'"));
        assert!(text.contains("-> (not recorded)"));
        assert!(!text.contains("Database"));
    }

    #[test]
    fn invalid_duplicates() {
        let cfg = config::Config {
            topics: HashMap::from([("comp1".into(), topic("/scan", "sensor_msgs/LaserScan"))]),
            streams: HashMap::from([("comp1".into(), stream(&[]))]),
            ..Default::default()
        };
        assert!(matches!(
            parse_topology_config(&cfg),
            Err(TopologyConfigError::DuplicateID(_))
        ));
    }

    #[test]
    fn invalid_duplicate_topics() {
        let cfg = config::Config {
            topics: HashMap::from([
                ("front".into(), topic("/scan", "sensor_msgs/LaserScan")),
                ("rear".into(), topic("/scan", "sensor_msgs/LaserScan")),
            ]),
            ..Default::default()
        };
        assert!(matches!(
            parse_topology_config(&cfg),
            Err(TopologyConfigError::DuplicateTopic(topic)) if topic == "/scan"
        ));
    }

    #[test]
    fn invalid_self_referencing() {
        let cfg = config::Config {
            topics: HashMap::from([("comp1".into(), topic("/scan", "sensor_msgs/LaserScan"))]),
            streams: HashMap::from([
                ("stream1".into(), stream(&["stream1", "comp1"])),
                ("stream2".into(), stream(&["stream1", "comp1"])),
            ]),
            ..Default::default()
        };
        assert!(matches!(
            parse_topology_config(&cfg),
            Err(TopologyConfigError::SelfReference(_))
        ));
    }

    #[test]
    fn invalid_unknown_input() {
        let cfg = config::Config {
            streams: HashMap::from([("viewer".into(), stream(&["lidar"]))]),
            ..Default::default()
        };
        assert!(matches!(
            parse_topology_config(&cfg),
            Err(TopologyConfigError::UnknownInput(ComponentID::GRPCSink(_), input)) if input == "lidar"
        ));
    }

    #[test]
    fn unsupported_type_fails_to_apply() {
        let cfg = config::Config {
            topics: HashMap::from([("chatter".into(), topic("/chatter", "std_msgs/String"))]),
            ..Default::default()
        };
        let topology = parse_topology_config(&cfg).unwrap();
        let mut state = TopologyState::default();
        assert!(matches!(
            state.apply_config(&topology, &HandlerRegistry::init()),
            Err(TopologyConfigError::InitializationError(ComponentID::TopicSubscriber(_), _))
        ));
    }

    #[tokio::test]
    async fn records_reach_db_sink() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config::Config {
            topics: HashMap::from([
                ("imu".into(), topic("/imu", "sensor_msgs/msg/Imu")),
                ("scan".into(), topic("/scan", "sensor_msgs/msg/LaserScan")),
            ]),
            ..Default::default()
        };
        cfg.db.data_dir = dir.path().to_path_buf();
        cfg.db.inputs = vec!["imu".into()];

        let topology = parse_topology_config(&cfg).unwrap();
        let mut state = TopologyState::default();
        let routes = state
            .apply_config(&topology, &HandlerRegistry::init())
            .unwrap();
        assert_eq!(
            routes.subscribers.keys().collect::<Vec<_>>(),
            vec!["/imu", "/scan"]
        );
        assert_eq!(routes.subscribers["/imu"].sensor_id(), "imu");

        let mut builder = routes.trajectory_builder;
        builder.add_sensor_data(
            "imu",
            SensorData::Imu(ImuData {
                time: Time::from_unix_nanos(1_000),
                linear_acceleration: nalgebra::Vector3::z(),
                angular_velocity: nalgebra::Vector3::zeros(),
            }),
        );
        drop(builder);
        drop(routes.subscribers);

        // Finishes on its own once the senders are gone.
        state.join().await;
        let files = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 1);
    }
}

//! Plays recorded ROS messages through the sensor bridge.
//!
//! Messages on the static transform topic fill the transform buffer, messages
//! on configured topics are handed to their subscriber, and all other messages
//! are skipped.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::Context as _;
use log::{debug, info, trace, warn};
use ros_carto_types::{codec::decode_message, definitions::tf2_msgs::TFMessage};

use crate::{
    handler::HandlerRegistry, sensor_bridge::SensorBridge, static_transforms::StaticTransforms,
    worker::TopicSubscriber,
};

/// One recorded message, borrowed from its container.
#[derive(Debug, Clone, Copy)]
pub struct RawMessage<'a> {
    pub topic: &'a str,

    /// Message type as recorded, e.g. `sensor_msgs/msg/Imu`.
    pub schema_name: Option<&'a str>,

    /// Payload encoding as recorded. Only `cdr` can be decoded.
    pub encoding: &'a str,

    pub data: &'a [u8],
}

/// Encoding of ROS 2 message payloads.
pub const CDR_ENCODING: &str = "cdr";

/// Message counts gathered during playback.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PlaybackStats {
    /// Messages handed to the bridge, per topic.
    pub handled: BTreeMap<String, usize>,

    /// Messages that failed to decode or were rejected, per topic.
    pub failed: BTreeMap<String, usize>,

    /// Static transforms added to the buffer.
    pub transforms: usize,

    /// Messages on topics without a subscriber, or in an encoding other
    /// than CDR.
    pub skipped: usize,
}

impl PlaybackStats {
    pub fn total_handled(&self) -> usize {
        self.handled.values().sum()
    }

    pub fn total_failed(&self) -> usize {
        self.failed.values().sum()
    }
}

impl Display for PlaybackStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} messages handled, {} failed, {} skipped, {} static transforms",
            self.total_handled(),
            self.total_failed(),
            self.skipped,
            self.transforms
        )
    }
}

pub struct Playback {
    bridge: SensorBridge,
    subscribers: BTreeMap<String, TopicSubscriber>,
    registry: HandlerRegistry,
    static_transforms: Arc<StaticTransforms>,
    tf_static_topic: String,
    stats: PlaybackStats,
    undecodable_topics: BTreeSet<String>,
}

impl Playback {
    /// `static_transforms` must be the buffer `bridge` looks transforms up in.
    pub fn new(
        bridge: SensorBridge,
        subscribers: BTreeMap<String, TopicSubscriber>,
        registry: HandlerRegistry,
        static_transforms: Arc<StaticTransforms>,
        tf_static_topic: &str,
    ) -> Self {
        Self {
            bridge,
            subscribers,
            registry,
            static_transforms,
            tf_static_topic: tf_static_topic.to_owned(),
            stats: PlaybackStats::default(),
            undecodable_topics: BTreeSet::new(),
        }
    }

    pub fn stats(&self) -> &PlaybackStats {
        &self.stats
    }

    /// Finish playback, closing the bridge and its outputs.
    pub fn into_stats(self) -> PlaybackStats {
        self.stats
    }

    /// Dispatch a single message.
    ///
    /// Failures are logged and counted; playback always continues with the
    /// next message.
    pub fn handle_message(&mut self, msg: &RawMessage<'_>) {
        if msg.encoding != CDR_ENCODING {
            if self.undecodable_topics.insert(msg.topic.to_owned()) {
                warn!(
                    "Skipping topic {}: messages are encoded as '{}', not CDR",
                    msg.topic, msg.encoding
                );
            }
            self.stats.skipped += 1;
            return;
        }
        if msg.topic == self.tf_static_topic {
            match decode_message::<TFMessage>(msg.data) {
                Ok(tf_message) => {
                    self.stats.transforms += tf_message.transforms.len();
                    self.static_transforms.insert_tf_message(&tf_message);
                }
                Err(err) => {
                    warn!("Failed to decode static transforms on {}: {err}", msg.topic);
                    *self.stats.failed.entry(msg.topic.to_owned()).or_default() += 1;
                }
            }
            return;
        }

        let Some(subscriber) = self.subscribers.get_mut(msg.topic) else {
            trace!("No subscriber for topic {}", msg.topic);
            self.stats.skipped += 1;
            return;
        };
        match subscriber.handle(&mut self.bridge, &self.registry, msg.schema_name, msg.data) {
            Ok(()) => *self.stats.handled.entry(msg.topic.to_owned()).or_default() += 1,
            Err(err) => {
                warn!(
                    "Dropping message on {} for sensor {}: {err}",
                    msg.topic,
                    subscriber.sensor_id()
                );
                *self.stats.failed.entry(msg.topic.to_owned()).or_default() += 1;
            }
        }
    }

    /// Play every message of an MCAP file in recorded order.
    ///
    /// Stops early once `stop` is set.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a valid MCAP
    /// recording.
    pub fn play_mcap(&mut self, path: &Path, stop: &AtomicBool) -> anyhow::Result<()> {
        let bytes =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        info!("Playing back {}", path.display());

        let stream = mcap::MessageStream::new(&bytes)
            .with_context(|| format!("{} is not an MCAP file", path.display()))?;
        for message in stream {
            if stop.load(Ordering::Relaxed) {
                info!("Playback interrupted");
                break;
            }
            let message =
                message.with_context(|| format!("failed to read a message from {}", path.display()))?;
            let schema_name = message.channel.schema.as_ref().map(|schema| schema.name.as_str());
            self.handle_message(&RawMessage {
                topic: &message.channel.topic,
                schema_name,
                encoding: &message.channel.message_encoding,
                data: &message.data,
            });
        }

        for (topic, subscriber) in &self.subscribers {
            match subscriber.ros_type() {
                Some(ros_type) => debug!("Topic {topic} played as {ros_type}"),
                None => warn!("No messages on topic {topic} for sensor {}", subscriber.sensor_id()),
            }
        }
        Ok(())
    }
}

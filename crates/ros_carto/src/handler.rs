use std::fmt::Debug;

use ahash::{HashMap, HashMapExt as _};
use dyn_clone::DynClone;
use log::debug;
use ros_carto_types::{codec::DecodeError, ROSTypeName, ROSTypeString};
use thiserror::Error;

use crate::{
    handlers::{
        imu::ImuHandler,
        pose::{LandmarkListHandler, NavSatFixHandler, OdometryHandler},
        rangefinder::{LaserScanHandler, MultiEchoLaserScanHandler, PointCloud2Handler},
    },
    sensor_bridge::{BridgeError, SensorBridge},
};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("No handler for ROS type {0}")]
    UnsupportedType(String),

    #[error("Invalid settings for ROS type {0}: {1}")]
    InvalidConfig(String, anyhow::Error),

    #[error("Unable to decode {0} message: {1}")]
    Decode(String, #[source] DecodeError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Per-topic handler settings.
///
/// Holds every key of a topic table that is not part of the topic
/// definition itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerSettings(pub toml::Table);

/// Configuration step of a handler.
///
/// Handlers are only configurable while they are built; afterwards they are
/// used through [`MessageHandler`].
pub(crate) trait HandlerCfg: MessageHandler {
    /// Apply per-topic settings.
    ///
    /// # Errors
    /// Returns `HandlerError::InvalidConfig` if the settings are invalid.
    fn set_config(&mut self, config: HandlerSettings) -> Result<(), HandlerError>;
}

dyn_clone::clone_trait_object!(HandlerCfg);

/// Decodes serialized messages of one ROS type and feeds them to a
/// [`SensorBridge`].
pub trait MessageHandler: DynClone + Debug + Send + Sync {
    /// The ROS message type this handler decodes.
    fn ros_type(&self) -> &ROSTypeString<'static>;

    /// Decode a CDR payload and pass it to the matching bridge operation.
    ///
    /// # Errors
    /// Returns `HandlerError::Decode` for malformed payloads and
    /// `HandlerError::Bridge` if the bridge rejects the message.
    fn handle(
        &self,
        bridge: &mut SensorBridge,
        sensor_id: &str,
        payload: &[u8],
    ) -> Result<(), HandlerError>;
}

dyn_clone::clone_trait_object!(MessageHandler);

/// Builder for configuring message handlers.
///
/// It abstracts over finding the handler in the registry and applying the
/// topic settings to it.
pub struct HandlerBuilder<'a> {
    registry: &'a HandlerRegistry,
    ros_type: Option<ROSTypeName>,
    config: Option<HandlerSettings>,
}

impl<'a> HandlerBuilder<'a> {
    pub fn new_with_registry(registry: &'a HandlerRegistry) -> Self {
        Self {
            registry,
            ros_type: None,
            config: None,
        }
    }

    pub fn ros_type(mut self, ros_type: ROSTypeName) -> Self {
        self.ros_type = Some(ros_type);
        self
    }

    pub fn config(mut self, config: HandlerSettings) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the handler.
    ///
    /// # Errors
    /// Returns `HandlerError::UnsupportedType` if no handler is registered for
    /// the ROS type, or `HandlerError::InvalidConfig` if the settings are
    /// rejected.
    pub fn build(self) -> Result<Box<dyn MessageHandler>, HandlerError> {
        let Some(ros_type) = self.ros_type else {
            return Err(HandlerError::UnsupportedType(
                ROSTypeString("", "").to_string(),
            ));
        };
        let mut handler = self.registry.find_handler(&ros_type)?;
        if let Some(config) = self.config {
            handler.set_config(config)?;
        }
        Ok(handler)
    }
}

/// Registry of message handlers keyed by ROS type.
pub struct HandlerRegistry {
    handlers: HashMap<ROSTypeName, Box<dyn HandlerCfg>>,
}

impl HandlerRegistry {
    pub fn init() -> Self {
        let mut registry = Self {
            handlers: HashMap::with_capacity(8),
        };

        // All message handlers are registered here
        registry.register(&LaserScanHandler);
        registry.register(&MultiEchoLaserScanHandler);
        registry.register(&PointCloud2Handler::default());
        registry.register(&ImuHandler);
        registry.register(&NavSatFixHandler);
        registry.register(&OdometryHandler);
        registry.register(&LandmarkListHandler);

        registry
    }

    pub fn supports(&self, ros_type: &ROSTypeName) -> bool {
        self.handlers.contains_key(ros_type)
    }

    /// All registered ROS types, sorted by name.
    pub fn ros_types(&self) -> Vec<&ROSTypeName> {
        let mut ros_types = self.handlers.keys().collect::<Vec<_>>();
        ros_types.sort();
        ros_types
    }

    fn find_handler(&self, ros_type: &ROSTypeName) -> Result<Box<dyn HandlerCfg>, HandlerError> {
        self.handlers
            .get(ros_type)
            .cloned()
            .ok_or_else(|| HandlerError::UnsupportedType(ros_type.to_string()))
    }

    fn register<T>(&mut self, handler: &T)
    where
        T: HandlerCfg + Clone + 'static,
    {
        match ROSTypeName::try_from(handler.ros_type()) {
            Ok(ros_type) => {
                debug!("Registered handler for ROS type {ros_type}");
                self.handlers.insert(ros_type, Box::new(handler.clone()));
            }
            Err(err) => {
                debug!(
                    "Failed to register handler for ROS type {}: {err}",
                    handler.ros_type()
                );
            }
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::init()
    }
}

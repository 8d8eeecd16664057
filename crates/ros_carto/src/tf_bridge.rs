use std::{sync::Arc, time::Duration};

use log::warn;
use ros_carto_types::{sensor::Rigid3d, time::Time};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TfError {
    #[error("\"{0}\" passed to lookupTransform argument target_frame does not exist")]
    UnknownTarget(String),

    #[error("\"{0}\" passed to lookupTransform argument source_frame does not exist")]
    UnknownSource(String),

    #[error("could not find a connection between '{target}' and '{source_frame}' because they are not part of the same tree")]
    NotConnected {
        target: String,
        source_frame: String,
    },

    #[error("lookup would require extrapolation to time {requested}, latest data is at {latest}")]
    Extrapolation { requested: Time, latest: Time },

    #[error("timed out after {0:?} waiting for a transform")]
    Timeout(Duration),
}

/// A transform together with the time it is valid for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StampedTransform {
    pub stamp: Time,
    pub transform: Rigid3d,
}

/// Source of coordinate frame transforms.
///
/// The returned transform maps coordinates in `source_frame` to
/// `target_frame`. A `time` of `None` asks for the latest available
/// transform. Implementations may block for up to `timeout` waiting for data.
pub trait LookupTransform: Send + Sync {
    /// Look up the transform from `source_frame` into `target_frame`.
    ///
    /// # Errors
    /// Returns a `TfError` if the frames are unknown, disconnected, or no data
    /// is available for `time` within `timeout`.
    fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        time: Option<Time>,
        timeout: Duration,
    ) -> Result<StampedTransform, TfError>;
}

/// Resolves sensor frames against the tracking frame.
#[derive(Clone)]
pub struct TfBridge {
    tracking_frame: String,
    lookup_transform_timeout: Duration,
    buffer: Arc<dyn LookupTransform>,
}

impl TfBridge {
    pub fn new(
        tracking_frame: &str,
        lookup_transform_timeout_sec: f64,
        buffer: Arc<dyn LookupTransform>,
    ) -> Self {
        Self {
            tracking_frame: tracking_frame.to_owned(),
            lookup_transform_timeout: Duration::try_from_secs_f64(lookup_transform_timeout_sec)
                .unwrap_or_default(),
            buffer,
        }
    }

    pub fn tracking_frame(&self) -> &str {
        &self.tracking_frame
    }

    /// The transform from `frame_id` into the tracking frame at `time`.
    ///
    /// `frame_id` is used as given. Returns `None` and logs a warning if the
    /// transform is unavailable.
    pub fn lookup_to_tracking(&self, time: Time, frame_id: &str) -> Option<Rigid3d> {
        match self.lookup(time, frame_id) {
            Ok(transform) => Some(transform),
            Err(err) => {
                warn!("{err}");
                None
            }
        }
    }

    fn lookup(&self, time: Time, frame_id: &str) -> Result<Rigid3d, TfError> {
        let mut timeout = self.lookup_transform_timeout;
        let latest = self.buffer.lookup_transform(
            &self.tracking_frame,
            frame_id,
            None,
            timeout,
        )?;
        if latest.stamp >= time {
            // Newer data is already there, so waiting could not help.
            timeout = Duration::ZERO;
        }
        self.buffer
            .lookup_transform(&self.tracking_frame, frame_id, Some(time), timeout)
            .map(|stamped| stamped.transform)
    }
}

impl std::fmt::Debug for TfBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TfBridge")
            .field("tracking_frame", &self.tracking_frame)
            .field("lookup_transform_timeout", &self.lookup_transform_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::Vector3;
    use parking_lot::Mutex;

    use super::*;

    /// Serves a fixed transform stamped at `latest` and records every query.
    struct ScriptedBuffer {
        latest: Time,
        queries: Mutex<Vec<(String, String, Option<Time>, Duration)>>,
    }

    impl LookupTransform for ScriptedBuffer {
        fn lookup_transform(
            &self,
            target_frame: &str,
            source_frame: &str,
            time: Option<Time>,
            timeout: Duration,
        ) -> Result<StampedTransform, TfError> {
            self.queries.lock().push((
                target_frame.to_owned(),
                source_frame.to_owned(),
                time,
                timeout,
            ));
            if source_frame != "laser" {
                return Err(TfError::UnknownSource(source_frame.to_owned()));
            }
            match time {
                Some(time) if time > self.latest => Err(TfError::Extrapolation {
                    requested: time,
                    latest: self.latest,
                }),
                _ => Ok(StampedTransform {
                    stamp: time.unwrap_or(self.latest),
                    transform: Rigid3d::translation(0.1, 0.0, 0.2),
                }),
            }
        }
    }

    fn bridge(latest: i64) -> (TfBridge, Arc<ScriptedBuffer>) {
        let buffer = Arc::new(ScriptedBuffer {
            latest: Time::from_universal(latest),
            queries: Mutex::new(Vec::new()),
        });
        (TfBridge::new("base_link", 0.5, buffer.clone()), buffer)
    }

    #[test]
    fn no_wait_when_newer_data_exists() {
        let (tf_bridge, buffer) = bridge(100);
        let transform = tf_bridge
            .lookup_to_tracking(Time::from_universal(50), "laser")
            .unwrap();
        assert_eq!(transform.translation.vector, Vector3::new(0.1, 0.0, 0.2));

        let queries = buffer.queries.lock();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].0, "base_link");
        assert_eq!(queries[0].1, "laser");
        assert_eq!(queries[0].2, None);
        assert_eq!(queries[0].3, Duration::from_millis(500));
        assert_eq!(queries[1].2, Some(Time::from_universal(50)));
        assert_eq!(queries[1].3, Duration::ZERO);
    }

    #[test]
    fn waits_when_data_is_older() {
        let (tf_bridge, buffer) = bridge(10);
        assert!(tf_bridge
            .lookup_to_tracking(Time::from_universal(50), "laser")
            .is_none());
        let queries = buffer.queries.lock();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[1].3, Duration::from_millis(500));
    }

    #[test]
    fn frame_id_is_passed_through() {
        let (tf_bridge, buffer) = bridge(100);
        assert!(tf_bridge
            .lookup_to_tracking(Time::from_universal(50), "/laser")
            .is_none());
        assert_eq!(buffer.queries.lock()[0].1, "/laser");
    }

    #[test]
    fn unknown_frame() {
        let (tf_bridge, buffer) = bridge(10);
        assert!(tf_bridge
            .lookup_to_tracking(Time::from_universal(5), "camera")
            .is_none());
        assert_eq!(buffer.queries.lock().len(), 1);
        assert_eq!(tf_bridge.tracking_frame(), "base_link");
    }
}

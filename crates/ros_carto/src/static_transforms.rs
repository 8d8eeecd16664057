use std::time::Duration;

use ahash::{HashMap, HashMapExt as _};
use log::debug;
use parking_lot::RwLock;
use ros_carto_types::{
    definitions::tf2_msgs::TFMessage,
    msg_conversion::{check_no_leading_slash, to_rigid3d_transform},
    sensor::Rigid3d,
    time::Time,
};

use crate::tf_bridge::{LookupTransform, StampedTransform, TfError};

/// Fixed mounting transforms between frames.
///
/// Every frame has at most one parent, so the table is a forest of frame
/// trees. Transforms never change over time, which is all a recorded robot
/// needs for its sensor extrinsics.
#[derive(Debug, Default)]
pub struct StaticTransforms {
    /// child frame -> (parent frame, parent_from_child)
    frames: RwLock<HashMap<String, (String, Rigid3d)>>,
}

impl StaticTransforms {
    pub fn new() -> Self {
        Self {
            frames: RwLock::new(HashMap::with_capacity(16)),
        }
    }

    /// Set the pose of `child` in `parent`, replacing any earlier parent.
    ///
    /// One leading `/` is dropped from both frame ids. Lookups take frame ids
    /// as given.
    pub fn insert(&self, parent: &str, child: &str, parent_from_child: Rigid3d) {
        let parent = check_no_leading_slash(parent).to_owned();
        let child = check_no_leading_slash(child).to_owned();
        debug!("Static transform {parent} -> {child}");
        self.frames
            .write()
            .insert(child, (parent, parent_from_child));
    }

    /// Add every transform of a `tf2_msgs/TFMessage`.
    pub fn insert_tf_message(&self, msg: &TFMessage) {
        for transform in &msg.transforms {
            self.insert(
                &transform.header.frame_id,
                &transform.child_frame_id,
                to_rigid3d_transform(transform),
            );
        }
    }

    pub fn len(&self) -> usize {
        self.frames.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.read().is_empty()
    }

    /// Walk from `frame` up to its root, composing `root_from_frame`.
    fn chain_to_root(
        frames: &HashMap<String, (String, Rigid3d)>,
        frame: &str,
    ) -> Option<(String, Rigid3d)> {
        let mut root = frame;
        let mut root_from_frame = Rigid3d::identity();
        // A well-formed tree is never deeper than its number of edges.
        for _ in 0..=frames.len() {
            match frames.get(root) {
                Some((parent, parent_from_child)) => {
                    root_from_frame = parent_from_child * root_from_frame;
                    root = parent;
                }
                None => return Some((root.to_owned(), root_from_frame)),
            }
        }
        None
    }

    fn is_known(frames: &HashMap<String, (String, Rigid3d)>, frame: &str) -> bool {
        frames.contains_key(frame) || frames.values().any(|(parent, _)| parent == frame)
    }
}

impl LookupTransform for StaticTransforms {
    fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        time: Option<Time>,
        _timeout: Duration,
    ) -> Result<StampedTransform, TfError> {
        let stamp = time.unwrap_or(Time::MAX);
        if target_frame == source_frame {
            return Ok(StampedTransform {
                stamp,
                transform: Rigid3d::identity(),
            });
        }

        let frames = self.frames.read();
        if !Self::is_known(&frames, target_frame) {
            return Err(TfError::UnknownTarget(target_frame.to_owned()));
        }
        if !Self::is_known(&frames, source_frame) {
            return Err(TfError::UnknownSource(source_frame.to_owned()));
        }
        let not_connected = || TfError::NotConnected {
            target: target_frame.to_owned(),
            source_frame: source_frame.to_owned(),
        };
        let (target_root, root_from_target) =
            Self::chain_to_root(&frames, target_frame).ok_or_else(not_connected)?;
        let (source_root, root_from_source) =
            Self::chain_to_root(&frames, source_frame).ok_or_else(not_connected)?;
        if target_root != source_root {
            return Err(not_connected());
        }

        Ok(StampedTransform {
            stamp,
            transform: root_from_target.inverse() * root_from_source,
        })
    }
}

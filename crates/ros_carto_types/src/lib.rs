//! This crate provides ROS message definitions and the sensor records consumed by
//! a SLAM trajectory builder, plus the conversions between the two.
//! It is a supporting crate for the `ros_carto` crate.

use std::fmt::Display;

use thiserror::Error;

pub mod codec;
pub mod definitions;
pub mod msg_conversion;
pub mod parsers;
pub mod sensor;
pub mod time;
pub mod trajectory_builder;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid ROS message type name '{0}', expected 'package/msg/Type' or 'package/Type'")]
pub struct InvalidTypeName(pub String);

/// Represents a validated ROS message type.
///
/// Parsed from either the `package/msg/Type` form used by ROS 2 and MCAP
/// schemas, or the short `package/Type` form used by ROS 1 tooling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ROSTypeName {
    package_name: String,
    type_name: String,
}

impl ROSTypeName {
    pub fn new(package_name: &str, type_name: &str) -> Self {
        Self {
            package_name: package_name.to_owned(),
            type_name: type_name.to_owned(),
        }
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

impl TryFrom<&str> for ROSTypeName {
    type Error = InvalidTypeName;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let parts = value.split('/').collect::<Vec<_>>();
        let (package_name, type_name) = match parts.as_slice() {
            [package, "msg", name] | [package, name] => (*package, *name),
            _ => return Err(InvalidTypeName(value.to_owned())),
        };
        if package_name.is_empty() || type_name.is_empty() {
            return Err(InvalidTypeName(value.to_owned()));
        }
        Ok(Self::new(package_name, type_name))
    }
}

impl TryFrom<&ROSTypeString<'_>> for ROSTypeName {
    type Error = InvalidTypeName;

    fn try_from(value: &ROSTypeString<'_>) -> Result<Self, Self::Error> {
        Self::try_from(format!("{}/msg/{}", value.0, value.1).as_str())
    }
}

impl Display for ROSTypeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/msg/{}", self.package_name, self.type_name)
    }
}

/// Represents an unchecked ROS message type.
///
/// This is meant for constant references to ROS message types.
/// Use `ROSTypeName` for anything parsed at runtime.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct ROSTypeString<'a>(pub &'a str, pub &'a str);

impl PartialEq<ROSTypeString<'_>> for ROSTypeName {
    fn eq(&self, other: &ROSTypeString<'_>) -> bool {
        self.package_name == other.0 && self.type_name == other.1
    }
}

impl PartialEq<ROSTypeName> for ROSTypeString<'_> {
    fn eq(&self, other: &ROSTypeName) -> bool {
        self.0 == other.package_name && self.1 == other.type_name
    }
}

impl Display for ROSTypeString<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() && self.1.is_empty() {
            write!(f, "<ANY>")
        } else {
            write!(f, "{}/msg/{}", self.0, self.1)
        }
    }
}

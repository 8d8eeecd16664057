//! CDR encoding of ROS 2 message payloads.
//!
//! Recorded ROS 2 messages are CDR encapsulated: a four byte header selecting
//! the byte order, followed by the message fields in `.msg` order with natural
//! alignment.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload of {0} bytes is too short for a CDR encapsulation header")]
    Truncated(usize),

    #[error("failed to decode CDR payload")]
    Cdr(#[from] cdr::Error),
}

/// Decode a CDR encapsulated payload into a message.
///
/// # Errors
/// Returns `DecodeError` if the payload does not hold a valid `T`.
pub fn decode_message<T>(payload: &[u8]) -> Result<T, DecodeError>
where
    T: DeserializeOwned,
{
    if payload.len() < 4 {
        return Err(DecodeError::Truncated(payload.len()));
    }
    Ok(cdr::deserialize::<T>(payload)?)
}

/// Encode a message as a little endian CDR encapsulated payload.
///
/// # Errors
/// Returns `DecodeError::Cdr` if the message cannot be represented in CDR.
pub fn encode_message<T>(msg: &T) -> Result<Vec<u8>, DecodeError>
where
    T: Serialize,
{
    Ok(cdr::serialize::<_, _, cdr::CdrLe>(msg, cdr::Infinite)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{
        builtin_interfaces::Time,
        sensor_msgs::{LaserScan, PointCloud2, PointField, PointFieldDatatype},
        std_msgs::Header,
    };

    #[test]
    fn laser_scan_payload() {
        let scan = LaserScan {
            header: Header {
                stamp: Time::new(1_700_000_000, 250),
                frame_id: "laser".into(),
            },
            angle_min: -1.0,
            angle_max: 1.0,
            angle_increment: 0.5,
            range_max: 10.0,
            ranges: vec![1.0, 2.0, 3.0, 4.0, 5.0],
            ..Default::default()
        };
        let payload = encode_message(&scan).unwrap();
        // Little endian CDR encapsulation id.
        assert_eq!(&payload[..2], &[0x00, 0x01]);
        let decoded: LaserScan = decode_message(&payload).unwrap();
        assert_eq!(decoded, scan);
    }

    #[test]
    fn point_field_datatype_is_validated() {
        let mut cloud = PointCloud2 {
            fields: vec![PointField {
                name: "x".into(),
                offset: 0,
                datatype: PointFieldDatatype::Float32,
                count: 1,
            }],
            point_step: 4,
            ..Default::default()
        };
        let payload = encode_message(&cloud).unwrap();
        let decoded: PointCloud2 = decode_message(&payload).unwrap();
        assert_eq!(decoded.fields[0].datatype, PointFieldDatatype::Float32);

        cloud.fields[0].datatype = PointFieldDatatype::Float64;
        let mut payload = encode_message(&cloud).unwrap();
        // The datatype byte directly follows the field offset.
        let index = payload
            .iter()
            .rposition(|b| *b == u8::from(PointFieldDatatype::Float64))
            .unwrap();
        payload[index] = 42;
        assert!(decode_message::<PointCloud2>(&payload).is_err());
    }

    #[test]
    fn truncated_payload() {
        assert!(matches!(
            decode_message::<Header>(&[0, 1]),
            Err(DecodeError::Truncated(2))
        ));
    }
}

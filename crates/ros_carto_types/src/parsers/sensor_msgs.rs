use std::io::Cursor;

use byteorder::{BigEndian, LittleEndian, ReadBytesExt as _};
use log::debug;

use crate::definitions::sensor_msgs::{PointCloud2, PointField, PointFieldDatatype};

fn access_point_field(
    data: &[u8],
    datatype: PointFieldDatatype,
    is_big_endian: bool,
) -> std::io::Result<f64> {
    let mut rdr = Cursor::new(data);
    match (is_big_endian, datatype) {
        (_, PointFieldDatatype::UInt8) => rdr.read_u8().map(f64::from),
        (_, PointFieldDatatype::Int8) => rdr.read_i8().map(f64::from),
        (true, PointFieldDatatype::Int16) => rdr.read_i16::<BigEndian>().map(f64::from),
        (true, PointFieldDatatype::UInt16) => rdr.read_u16::<BigEndian>().map(f64::from),
        (true, PointFieldDatatype::Int32) => rdr.read_i32::<BigEndian>().map(f64::from),
        (true, PointFieldDatatype::UInt32) => rdr.read_u32::<BigEndian>().map(f64::from),
        (true, PointFieldDatatype::Float32) => rdr.read_f32::<BigEndian>().map(f64::from),
        (true, PointFieldDatatype::Float64) => rdr.read_f64::<BigEndian>(),
        (false, PointFieldDatatype::Int16) => rdr.read_i16::<LittleEndian>().map(f64::from),
        (false, PointFieldDatatype::UInt16) => rdr.read_u16::<LittleEndian>().map(f64::from),
        (false, PointFieldDatatype::Int32) => rdr.read_i32::<LittleEndian>().map(f64::from),
        (false, PointFieldDatatype::UInt32) => rdr.read_u32::<LittleEndian>().map(f64::from),
        (false, PointFieldDatatype::Float32) => rdr.read_f32::<LittleEndian>().map(f64::from),
        (false, PointFieldDatatype::Float64) => rdr.read_f64::<LittleEndian>(),
    }
}

type Accessor = (usize, PointFieldDatatype);

fn find_accessor(fields: &[PointField], name: &str) -> Option<Accessor> {
    fields
        .iter()
        .find(|field| field.name == name)
        .map(|field| (field.offset as usize, field.datatype))
}

/// Reads `x`, `y`, `z` and one optional extra channel from packed point data.
///
/// Values that cannot be read, e.g. because a field offset points past the
/// end of the point, come back as NaN.
#[derive(Debug, Clone)]
pub struct PointFieldReader {
    point_step: usize,
    is_big_endian: bool,
    x_accessor: Accessor,
    y_accessor: Accessor,
    z_accessor: Accessor,
    extra_accessor: Option<Accessor>,
}

/// A single decoded point: position and the optional extra channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub extra: Option<f64>,
}

impl RawPoint {
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl PointFieldReader {
    /// Build a reader for `cloud`, additionally reading the `extra` field if given.
    ///
    /// Returns `None` if the cloud has no `x`, `y` or `z` field, if a requested
    /// `extra` field is missing, or if the point step is zero.
    pub fn try_new(cloud: &PointCloud2, extra: Option<&str>) -> Option<Self> {
        if cloud.point_step == 0 {
            return None;
        }
        let extra_accessor = match extra {
            Some(name) => Some(find_accessor(&cloud.fields, name)?),
            None => None,
        };
        Some(Self {
            point_step: cloud.point_step as usize,
            is_big_endian: cloud.is_bigendian,
            x_accessor: find_accessor(&cloud.fields, "x")?,
            y_accessor: find_accessor(&cloud.fields, "y")?,
            z_accessor: find_accessor(&cloud.fields, "z")?,
            extra_accessor,
        })
    }

    fn read(&self, point: &[u8], accessor: Accessor, component: &str) -> f64 {
        let Some(bytes) = point.get(accessor.0..) else {
            debug!("point field `{component}` starts past the end of the point");
            return f64::NAN;
        };
        match access_point_field(bytes, accessor.1, self.is_big_endian) {
            Ok(value) => value,
            Err(err) => {
                debug!("failed to read `{component}`: {err}");
                f64::NAN
            }
        }
    }

    /// Iterate all points in `data`, ignoring trailing bytes of a partial point.
    pub fn points<'a>(&'a self, data: &'a [u8]) -> impl Iterator<Item = RawPoint> + 'a {
        data.chunks_exact(self.point_step).map(move |point| RawPoint {
            x: self.read(point, self.x_accessor, "x"),
            y: self.read(point, self.y_accessor, "y"),
            z: self.read(point, self.z_accessor, "z"),
            extra: self
                .extra_accessor
                .map(|accessor| self.read(point, accessor, "extra")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, offset: u32, datatype: PointFieldDatatype) -> PointField {
        PointField {
            name: name.into(),
            offset,
            datatype,
            count: 1,
        }
    }

    fn xyz_cloud(
        extra: PointField,
        point_step: u32,
        data: Vec<u8>,
        is_bigendian: bool,
    ) -> PointCloud2 {
        PointCloud2 {
            fields: vec![
                field("x", 0, PointFieldDatatype::Float32),
                field("y", 4, PointFieldDatatype::Float32),
                field("z", 8, PointFieldDatatype::Float32),
                extra,
            ],
            is_bigendian,
            point_step,
            data,
            ..Default::default()
        }
    }

    #[test]
    fn reads_little_endian_points_with_extra_field() {
        let mut data = Vec::new();
        for (x, t) in [(1.0_f32, 10_u32), (2.0, 20)] {
            data.extend_from_slice(&x.to_le_bytes());
            data.extend_from_slice(&0.5_f32.to_le_bytes());
            data.extend_from_slice(&(-1.0_f32).to_le_bytes());
            data.extend_from_slice(&t.to_le_bytes());
        }
        let cloud = xyz_cloud(field("t", 12, PointFieldDatatype::UInt32), 16, data, false);
        let reader = PointFieldReader::try_new(&cloud, Some("t")).unwrap();
        let points = reader.points(&cloud.data).collect::<Vec<_>>();
        assert_eq!(
            points,
            vec![
                RawPoint { x: 1.0, y: 0.5, z: -1.0, extra: Some(10.0) },
                RawPoint { x: 2.0, y: 0.5, z: -1.0, extra: Some(20.0) },
            ]
        );
    }

    #[test]
    fn reads_big_endian_float64() {
        let mut data = Vec::new();
        data.extend_from_slice(&3.0_f32.to_be_bytes());
        data.extend_from_slice(&4.0_f32.to_be_bytes());
        data.extend_from_slice(&5.0_f32.to_be_bytes());
        data.extend_from_slice(&1_234.5_f64.to_be_bytes());
        let cloud = xyz_cloud(
            field("timestamp", 12, PointFieldDatatype::Float64),
            20,
            data,
            true,
        );
        let reader = PointFieldReader::try_new(&cloud, Some("timestamp")).unwrap();
        let point = reader.points(&cloud.data).next().unwrap();
        assert_eq!(point.x, 3.0);
        assert_eq!(point.extra, Some(1_234.5));
    }

    #[test]
    fn missing_fields() {
        let intensity = field("intensity", 12, PointFieldDatatype::Float32);
        let cloud = xyz_cloud(intensity, 16, vec![], false);
        assert!(PointFieldReader::try_new(&cloud, None).is_some());
        assert!(PointFieldReader::try_new(&cloud, Some("time")).is_none());

        let mut no_z = cloud.clone();
        no_z.fields.retain(|f| f.name != "z");
        assert!(PointFieldReader::try_new(&no_z, None).is_none());
    }

    #[test]
    fn field_past_point_end_reads_nan() {
        let data = [0_u8; 12].to_vec();
        let cloud = xyz_cloud(field("t", 40, PointFieldDatatype::UInt32), 12, data, false);
        let reader = PointFieldReader::try_new(&cloud, Some("t")).unwrap();
        let point = reader.points(&cloud.data).next().unwrap();
        assert!(point.is_finite());
        assert!(point.extra.is_some_and(f64::is_nan));
    }
}

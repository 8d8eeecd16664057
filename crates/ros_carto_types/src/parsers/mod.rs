pub mod sensor_msgs;

mod compression;
mod normalize;
mod reader;
mod tarball;
mod uid;

pub use self::reader::{
    stream_container, ContainerCounters, ContainerError, RawMeasurement, Records,
};
pub use self::uid::trivial_id;

pub mod reading;
pub mod service;

pub use service::SensorPipeline;

pub mod hvac;
pub mod policy;

pub use hvac::HvacClient;

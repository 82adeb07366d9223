pub mod gps;
pub mod ilqr;

pub use gps::{MbgpsBuilder, MfgpsBuilder};
pub use ilqr::IlqrBuilder;

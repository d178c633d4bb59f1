pub mod config;
pub mod timing;
pub mod types;

pub use config::AutoProvConfig;
pub use timing::{TimingError, check_timing, epoch_millis, wait_time};
pub use types::*;

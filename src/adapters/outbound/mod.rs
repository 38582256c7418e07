mod local_file_store;
mod static_device_info;
mod system_clock;

pub use local_file_store::LocalFileStore;
pub use static_device_info::StaticDeviceInfo;
pub use system_clock::{ManualClock, SystemClock};

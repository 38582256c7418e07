mod clock;
mod device_info;
mod file_store;

pub use clock::Clock;
pub use device_info::DeviceInfo;
pub use file_store::FileStore;

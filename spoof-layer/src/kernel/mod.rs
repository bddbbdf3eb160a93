mod common;
mod global;
mod store;

pub use common::KernelContext;
pub use global::{acquire, LayerKernel};
pub use store::{DeviceRecord, DeviceRecordStore};

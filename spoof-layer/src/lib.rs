//! Vulkan layer that reports spoofed physical device properties and limits.
//!
//! The overrides are read from the JSON file named by `VK_SPOOF_JSON_FILE` whenever an instance
//! is created. Applications can replace limits at runtime through `vkSetPhysicalDeviceLimitsEXT`
//! and read the driver's values back through `vkGetOriginalPhysicalDeviceLimitsEXT`.

#![allow(clippy::missing_safety_doc)]

use std::ffi::c_char;

use ash::vk as raw;

pub mod common;
pub mod config;
pub mod hook;
pub mod kernel;
pub mod overlay;
pub mod vk;

pub use common::LayerError;
pub use config::LayerConfig;
pub use kernel::{DeviceRecord, DeviceRecordStore, KernelContext};
pub use overlay::{DescriptionError, DeviceDescription};

use crate::vk::layer;
use crate::vk::sys::VkNegotiateLayerInterface;

#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "system" fn vkNegotiateLoaderLayerInterfaceVersion(
    p_version_struct: *mut VkNegotiateLayerInterface,
) -> raw::Result {
    layer::negotiate_loader_layer_interface_version(p_version_struct)
}

#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "system" fn vkGetInstanceProcAddr(
    instance: raw::Instance,
    p_name: *const c_char,
) -> raw::PFN_vkVoidFunction {
    layer::get_instance_proc_addr(instance, p_name)
}

#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "system" fn vkGetDeviceProcAddr(device: raw::Device, p_name: *const c_char) -> raw::PFN_vkVoidFunction {
    layer::get_device_proc_addr(device, p_name)
}

#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "system" fn vkEnumerateInstanceLayerProperties(
    p_property_count: *mut u32,
    p_properties: *mut raw::LayerProperties,
) -> raw::Result {
    layer::enumerate_instance_layer_properties(p_property_count, p_properties)
}

#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "system" fn vkEnumerateDeviceLayerProperties(
    physical_device: raw::PhysicalDevice,
    p_property_count: *mut u32,
    p_properties: *mut raw::LayerProperties,
) -> raw::Result {
    layer::enumerate_device_layer_properties(physical_device, p_property_count, p_properties)
}

#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "system" fn vkEnumerateInstanceExtensionProperties(
    p_layer_name: *const c_char,
    p_property_count: *mut u32,
    p_properties: *mut raw::ExtensionProperties,
) -> raw::Result {
    layer::enumerate_instance_extension_properties(p_layer_name, p_property_count, p_properties)
}

#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "system" fn vkEnumerateDeviceExtensionProperties(
    physical_device: raw::PhysicalDevice,
    p_layer_name: *const c_char,
    p_property_count: *mut u32,
    p_properties: *mut raw::ExtensionProperties,
) -> raw::Result {
    layer::enumerate_device_extension_properties(physical_device, p_layer_name, p_property_count, p_properties)
}

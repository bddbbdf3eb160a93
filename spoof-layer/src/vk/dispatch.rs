use std::ptr;

use ash::prelude::VkResult;
use ash::{vk, RawPtr};

use crate::common::LayerError;
use crate::hook::{DeviceChain, InstanceChain};
use crate::vk::sys::{PFN_GetPhysicalDeviceProcAddr, PFN_vkLayerSpoofEXT};

/// Resolves `$name` through a `vkGet*ProcAddr` style resolver as an optional `$pfn`.
macro_rules! proc_addr {
    ($gpa:expr, $handle:expr, $name:literal as $pfn:ty) => {
        ::std::mem::transmute::<::ash::vk::PFN_vkVoidFunction, Option<$pfn>>(($gpa)(
            $handle,
            concat!($name, "\0").as_ptr() as *const ::std::ffi::c_char,
        ))
    };
}

pub(crate) use proc_addr;

macro_rules! required_proc_addr {
    ($gpa:expr, $handle:expr, $name:literal as $pfn:ty) => {
        proc_addr!($gpa, $handle, $name as $pfn).ok_or(LayerError::MissingEntryPoint($name))?
    };
}

/// Instance-level entry points of the next layer, resolved once per instance.
pub struct InstanceDispatchTable {
    pub get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    pub get_physical_device_proc_addr: Option<PFN_GetPhysicalDeviceProcAddr>,
    pub destroy_instance: vk::PFN_vkDestroyInstance,
    pub enumerate_physical_devices: vk::PFN_vkEnumeratePhysicalDevices,
    pub enumerate_device_extension_properties: vk::PFN_vkEnumerateDeviceExtensionProperties,
    pub get_physical_device_properties: vk::PFN_vkGetPhysicalDeviceProperties,
    pub get_physical_device_properties2: Option<vk::PFN_vkGetPhysicalDeviceProperties2>,
    pub get_physical_device_features: vk::PFN_vkGetPhysicalDeviceFeatures,
    pub get_physical_device_format_properties: vk::PFN_vkGetPhysicalDeviceFormatProperties,
    pub get_physical_device_image_format_properties: vk::PFN_vkGetPhysicalDeviceImageFormatProperties,
    pub get_physical_device_queue_family_properties: vk::PFN_vkGetPhysicalDeviceQueueFamilyProperties,
    pub get_physical_device_memory_properties: vk::PFN_vkGetPhysicalDeviceMemoryProperties,
}

impl InstanceDispatchTable {
    /// SAFETY: `gipa` must be the next layer's resolver and `instance` a handle it created.
    pub unsafe fn load(
        instance: vk::Instance,
        gipa: vk::PFN_vkGetInstanceProcAddr,
        gpdpa: Option<PFN_GetPhysicalDeviceProcAddr>,
    ) -> Result<InstanceDispatchTable, LayerError> {
        let mut get_physical_device_properties2 =
            proc_addr!(gipa, instance, "vkGetPhysicalDeviceProperties2" as vk::PFN_vkGetPhysicalDeviceProperties2);
        if get_physical_device_properties2.is_none() {
            get_physical_device_properties2 =
                proc_addr!(gipa, instance, "vkGetPhysicalDeviceProperties2KHR" as vk::PFN_vkGetPhysicalDeviceProperties2);
        }

        Ok(InstanceDispatchTable {
            get_instance_proc_addr: gipa,
            get_physical_device_proc_addr: gpdpa,
            destroy_instance: required_proc_addr!(gipa, instance, "vkDestroyInstance" as vk::PFN_vkDestroyInstance),
            enumerate_physical_devices: required_proc_addr!(
                gipa, instance, "vkEnumeratePhysicalDevices" as vk::PFN_vkEnumeratePhysicalDevices
            ),
            enumerate_device_extension_properties: required_proc_addr!(
                gipa, instance, "vkEnumerateDeviceExtensionProperties" as vk::PFN_vkEnumerateDeviceExtensionProperties
            ),
            get_physical_device_properties: required_proc_addr!(
                gipa, instance, "vkGetPhysicalDeviceProperties" as vk::PFN_vkGetPhysicalDeviceProperties
            ),
            get_physical_device_properties2,
            get_physical_device_features: required_proc_addr!(
                gipa, instance, "vkGetPhysicalDeviceFeatures" as vk::PFN_vkGetPhysicalDeviceFeatures
            ),
            get_physical_device_format_properties: required_proc_addr!(
                gipa, instance, "vkGetPhysicalDeviceFormatProperties" as vk::PFN_vkGetPhysicalDeviceFormatProperties
            ),
            get_physical_device_image_format_properties: required_proc_addr!(
                gipa, instance, "vkGetPhysicalDeviceImageFormatProperties" as vk::PFN_vkGetPhysicalDeviceImageFormatProperties
            ),
            get_physical_device_queue_family_properties: required_proc_addr!(
                gipa, instance, "vkGetPhysicalDeviceQueueFamilyProperties" as vk::PFN_vkGetPhysicalDeviceQueueFamilyProperties
            ),
            get_physical_device_memory_properties: required_proc_addr!(
                gipa, instance, "vkGetPhysicalDeviceMemoryProperties" as vk::PFN_vkGetPhysicalDeviceMemoryProperties
            ),
        })
    }
}

impl InstanceChain for InstanceDispatchTable {
    fn enumerate_devices(&self, instance: vk::Instance) -> VkResult<Vec<vk::PhysicalDevice>> {
        // The count can grow between the two calls, retry until it holds still.
        loop {
            let mut count = 0;
            unsafe { (self.enumerate_physical_devices)(instance, &mut count, ptr::null_mut()) }.result()?;

            let mut physical_devices = Vec::with_capacity(count as usize);
            let result =
                unsafe { (self.enumerate_physical_devices)(instance, &mut count, physical_devices.as_mut_ptr()) };
            if result == vk::Result::INCOMPLETE {
                continue;
            }
            result.result()?;

            unsafe { physical_devices.set_len(count as usize) };
            return Ok(physical_devices);
        }
    }

    fn device_properties(&self, physical_device: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties {
        let mut properties = vk::PhysicalDeviceProperties::default();
        unsafe { (self.get_physical_device_properties)(physical_device, &mut properties) };
        properties
    }

    fn destroy(&self, instance: vk::Instance, allocator: Option<&vk::AllocationCallbacks>) {
        unsafe { (self.destroy_instance)(instance, allocator.as_raw_ptr()) }
    }
}

/// Device-level entry points of the next layer, resolved once per device.
pub struct DeviceDispatchTable {
    pub get_device_proc_addr: vk::PFN_vkGetDeviceProcAddr,
    pub destroy_device: vk::PFN_vkDestroyDevice,
    /// `vkLayerSpoofEXT` of a layer below, if one implements it.
    pub layer_spoof: Option<PFN_vkLayerSpoofEXT>,
}

impl DeviceDispatchTable {
    /// SAFETY: `gdpa` must be the next layer's resolver and `device` a handle it created.
    pub unsafe fn load(device: vk::Device, gdpa: vk::PFN_vkGetDeviceProcAddr) -> Result<DeviceDispatchTable, LayerError> {
        Ok(DeviceDispatchTable {
            get_device_proc_addr: gdpa,
            destroy_device: required_proc_addr!(gdpa, device, "vkDestroyDevice" as vk::PFN_vkDestroyDevice),
            layer_spoof: proc_addr!(gdpa, device, "vkLayerSpoofEXT" as PFN_vkLayerSpoofEXT),
        })
    }
}

impl DeviceChain for DeviceDispatchTable {
    fn destroy(&self, device: vk::Device, allocator: Option<&vk::AllocationCallbacks>) {
        unsafe { (self.destroy_device)(device, allocator.as_raw_ptr()) }
    }

    fn forward_layer_spoof(&self, physical_device: vk::PhysicalDevice) -> Option<vk::Result> {
        let next = self.layer_spoof?;
        Some(unsafe { next(physical_device) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::ffi::{c_char, CStr};
    use std::sync::atomic::{AtomicU32, Ordering};

    static GROWN: AtomicU32 = AtomicU32::new(0);

    unsafe extern "system" fn growing_enumerate(
        _instance: vk::Instance,
        p_count: *mut u32,
        p_devices: *mut vk::PhysicalDevice,
    ) -> vk::Result {
        // A device shows up between the count query and the first fill.
        let available = if GROWN.fetch_add(1, Ordering::SeqCst) == 0 { 1 } else { 2 };
        if p_devices.is_null() {
            *p_count = available;
            return vk::Result::SUCCESS;
        }
        let written = (*p_count).min(available);
        for i in 0..written {
            *p_devices.add(i as usize) = vk::PhysicalDevice::from_raw(0x100 + i as u64);
        }
        *p_count = written;
        if written < available {
            vk::Result::INCOMPLETE
        } else {
            vk::Result::SUCCESS
        }
    }

    unsafe extern "system" fn failing_enumerate(
        _instance: vk::Instance,
        _p_count: *mut u32,
        _p_devices: *mut vk::PhysicalDevice,
    ) -> vk::Result {
        vk::Result::ERROR_INITIALIZATION_FAILED
    }

    unsafe extern "system" fn partial_gipa(_instance: vk::Instance, p_name: *const c_char) -> vk::PFN_vkVoidFunction {
        match CStr::from_ptr(p_name).to_bytes() {
            b"vkEnumeratePhysicalDevices" => Some(std::mem::transmute(
                failing_enumerate as vk::PFN_vkEnumeratePhysicalDevices,
            )),
            _ => None,
        }
    }

    unsafe extern "system" fn no_properties(_physical_device: vk::PhysicalDevice, _p: *mut vk::PhysicalDeviceProperties) {}
    unsafe extern "system" fn no_destroy(_instance: vk::Instance, _p: *const vk::AllocationCallbacks) {}
    unsafe extern "system" fn no_features(_physical_device: vk::PhysicalDevice, _p: *mut vk::PhysicalDeviceFeatures) {}
    unsafe extern "system" fn no_format(_pd: vk::PhysicalDevice, _f: vk::Format, _p: *mut vk::FormatProperties) {}
    unsafe extern "system" fn no_image_format(
        _pd: vk::PhysicalDevice,
        _f: vk::Format,
        _t: vk::ImageType,
        _tiling: vk::ImageTiling,
        _u: vk::ImageUsageFlags,
        _c: vk::ImageCreateFlags,
        _p: *mut vk::ImageFormatProperties,
    ) -> vk::Result {
        vk::Result::SUCCESS
    }
    unsafe extern "system" fn no_queues(_pd: vk::PhysicalDevice, _c: *mut u32, _p: *mut vk::QueueFamilyProperties) {}
    unsafe extern "system" fn no_memory(_pd: vk::PhysicalDevice, _p: *mut vk::PhysicalDeviceMemoryProperties) {}
    unsafe extern "system" fn no_extensions(
        _pd: vk::PhysicalDevice,
        _l: *const c_char,
        _c: *mut u32,
        _p: *mut vk::ExtensionProperties,
    ) -> vk::Result {
        vk::Result::SUCCESS
    }

    fn table(enumerate: vk::PFN_vkEnumeratePhysicalDevices) -> InstanceDispatchTable {
        InstanceDispatchTable {
            get_instance_proc_addr: partial_gipa,
            get_physical_device_proc_addr: None,
            destroy_instance: no_destroy,
            enumerate_physical_devices: enumerate,
            enumerate_device_extension_properties: no_extensions,
            get_physical_device_properties: no_properties,
            get_physical_device_properties2: None,
            get_physical_device_features: no_features,
            get_physical_device_format_properties: no_format,
            get_physical_device_image_format_properties: no_image_format,
            get_physical_device_queue_family_properties: no_queues,
            get_physical_device_memory_properties: no_memory,
        }
    }

    #[test]
    fn enumeration_retries_when_incomplete() {
        let devices = table(growing_enumerate).enumerate_devices(vk::Instance::null()).unwrap();
        assert_eq!(
            devices,
            vec![vk::PhysicalDevice::from_raw(0x100), vk::PhysicalDevice::from_raw(0x101)]
        );
        assert!(GROWN.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn enumeration_failure_passes_through() {
        assert_eq!(
            table(failing_enumerate).enumerate_devices(vk::Instance::null()),
            Err(vk::Result::ERROR_INITIALIZATION_FAILED)
        );
    }

    #[test]
    fn missing_required_entry_point_is_named() {
        let err = unsafe { InstanceDispatchTable::load(vk::Instance::null(), partial_gipa, None) }
            .err()
            .unwrap();
        assert!(matches!(err, LayerError::MissingEntryPoint("vkDestroyInstance")));
    }
}

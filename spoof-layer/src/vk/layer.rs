use std::ffi::{c_char, CStr};
use std::sync::Arc;

use ash::vk::Handle;
use ash::{vk, RawPtr};
use tracing::{debug, error, info, trace, warn};

use crate::common::LayerError;
use crate::config::LayerConfig;
use crate::hook::InstanceChain;
use crate::kernel::{self, LayerKernel};
use crate::overlay::DeviceDescription;
use crate::vk::dispatch::{proc_addr, DeviceDispatchTable, InstanceDispatchTable};
use crate::vk::enumerate::{
    enumerate_properties, is_this_layer, DEVICE_EXTENSIONS, EXTENSION_NAME, INSTANCE_EXTENSIONS, LAYER_PROPERTIES,
};
use crate::vk::sys::{self, VkLayerNegotiateStructType, VkNegotiateLayerInterface, LAYER_INTERFACE_VERSION};

fn kernel() -> &'static LayerKernel {
    kernel::acquire()
}

/// Maps a physical device handle onto the one the kernel tables are keyed by.
fn normalized(physical_device: vk::PhysicalDevice) -> vk::PhysicalDevice {
    kernel().normalize(physical_device, |physical_device| unsafe {
        sys::unwrap_physical_device(physical_device)
    })
}

/// Normalized handle and the chain of the instance that owns it.
fn owning_chain(physical_device: vk::PhysicalDevice) -> Option<(vk::PhysicalDevice, Arc<InstanceDispatchTable>)> {
    let physical_device = normalized(physical_device);
    match kernel().physical_device_chain(physical_device) {
        Some(chain) => Some((physical_device, chain)),
        None => {
            error!(?physical_device, "physical device has no known instance, chain lost");
            None
        }
    }
}

/// Entry points that take a physical device and may be reached through a loader trampoline.
unsafe fn physical_device_proc(name: &[u8]) -> vk::PFN_vkVoidFunction {
    match name {
        b"vkLayerSpoofEXT" => Some(std::mem::transmute(layer_spoof_ext as sys::PFN_vkLayerSpoofEXT)),
        b"vkSetPhysicalDeviceLimitsEXT" => Some(std::mem::transmute(
            set_physical_device_limits_ext as sys::PFN_vkSetPhysicalDeviceLimitsEXT,
        )),
        b"vkGetOriginalPhysicalDeviceLimitsEXT" => Some(std::mem::transmute(
            get_original_physical_device_limits_ext as sys::PFN_vkGetOriginalPhysicalDeviceLimitsEXT,
        )),
        _ => None,
    }
}

unsafe fn device_proc(name: &[u8]) -> vk::PFN_vkVoidFunction {
    match name {
        b"vkGetDeviceProcAddr" => Some(std::mem::transmute(get_device_proc_addr as vk::PFN_vkGetDeviceProcAddr)),
        b"vkDestroyDevice" => Some(std::mem::transmute(destroy_device as vk::PFN_vkDestroyDevice)),
        _ => physical_device_proc(name),
    }
}

pub unsafe extern "system" fn get_instance_proc_addr(
    instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    if p_name.is_null() {
        return None;
    }
    let name = CStr::from_ptr(p_name);
    match name.to_bytes() {
        b"vkGetInstanceProcAddr" => Some(std::mem::transmute(get_instance_proc_addr as vk::PFN_vkGetInstanceProcAddr)),
        b"vkCreateInstance" => Some(std::mem::transmute(create_instance as vk::PFN_vkCreateInstance)),
        b"vkDestroyInstance" => Some(std::mem::transmute(destroy_instance as vk::PFN_vkDestroyInstance)),
        b"vkEnumerateInstanceLayerProperties" => Some(std::mem::transmute(
            enumerate_instance_layer_properties as vk::PFN_vkEnumerateInstanceLayerProperties,
        )),
        b"vkEnumerateInstanceExtensionProperties" => Some(std::mem::transmute(
            enumerate_instance_extension_properties as vk::PFN_vkEnumerateInstanceExtensionProperties,
        )),
        b"vkEnumerateDeviceLayerProperties" => Some(std::mem::transmute(
            enumerate_device_layer_properties as vk::PFN_vkEnumerateDeviceLayerProperties,
        )),
        b"vkEnumerateDeviceExtensionProperties" => Some(std::mem::transmute(
            enumerate_device_extension_properties as vk::PFN_vkEnumerateDeviceExtensionProperties,
        )),
        b"vkEnumeratePhysicalDevices" => Some(std::mem::transmute(
            enumerate_physical_devices as vk::PFN_vkEnumeratePhysicalDevices,
        )),
        b"vkGetPhysicalDeviceProperties" => Some(std::mem::transmute(
            get_physical_device_properties as vk::PFN_vkGetPhysicalDeviceProperties,
        )),
        b"vkGetPhysicalDeviceProperties2" | b"vkGetPhysicalDeviceProperties2KHR" => Some(std::mem::transmute(
            get_physical_device_properties2 as vk::PFN_vkGetPhysicalDeviceProperties2,
        )),
        b"vkGetPhysicalDeviceFeatures" => Some(std::mem::transmute(
            get_physical_device_features as vk::PFN_vkGetPhysicalDeviceFeatures,
        )),
        b"vkGetPhysicalDeviceFormatProperties" => Some(std::mem::transmute(
            get_physical_device_format_properties as vk::PFN_vkGetPhysicalDeviceFormatProperties,
        )),
        b"vkGetPhysicalDeviceImageFormatProperties" => Some(std::mem::transmute(
            get_physical_device_image_format_properties as vk::PFN_vkGetPhysicalDeviceImageFormatProperties,
        )),
        b"vkGetPhysicalDeviceQueueFamilyProperties" => Some(std::mem::transmute(
            get_physical_device_queue_family_properties as vk::PFN_vkGetPhysicalDeviceQueueFamilyProperties,
        )),
        b"vkGetPhysicalDeviceMemoryProperties" => Some(std::mem::transmute(
            get_physical_device_memory_properties as vk::PFN_vkGetPhysicalDeviceMemoryProperties,
        )),
        b"vkCreateDevice" => Some(std::mem::transmute(create_device as vk::PFN_vkCreateDevice)),
        bytes => match device_proc(bytes) {
            Some(pfn) => Some(pfn),
            None => {
                let chain = kernel().instance_chain(instance)?;
                trace!(name = ?name, "forwarding instance proc lookup");
                (chain.get_instance_proc_addr)(instance, p_name)
            }
        },
    }
}

pub unsafe extern "system" fn get_device_proc_addr(device: vk::Device, p_name: *const c_char) -> vk::PFN_vkVoidFunction {
    if p_name.is_null() {
        return None;
    }
    let name = CStr::from_ptr(p_name);
    match device_proc(name.to_bytes()) {
        Some(pfn) => Some(pfn),
        None => {
            let chain = kernel().device_chain(device)?;
            trace!(name = ?name, "forwarding device proc lookup");
            (chain.get_device_proc_addr)(device, p_name)
        }
    }
}

pub unsafe extern "system" fn get_physical_device_proc_addr(
    instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    if p_name.is_null() {
        return None;
    }
    match physical_device_proc(CStr::from_ptr(p_name).to_bytes()) {
        Some(pfn) => Some(pfn),
        None => {
            let chain = kernel().instance_chain(instance)?;
            (chain.get_physical_device_proc_addr?)(instance, p_name)
        }
    }
}

pub unsafe extern "system" fn negotiate_loader_layer_interface_version(
    p_interface: *mut VkNegotiateLayerInterface,
) -> vk::Result {
    // first call from the loader, brings up logging
    kernel();
    let Some(interface) = p_interface.as_mut() else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    if interface.s_type != VkLayerNegotiateStructType::LAYER_NEGOTIATE_INTERFACE_STRUCT {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    }

    let requested = interface.loader_layer_interface_version;
    if requested < LAYER_INTERFACE_VERSION {
        warn!(requested, "loader interface too old");
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    }

    interface.loader_layer_interface_version = LAYER_INTERFACE_VERSION;
    interface.pfn_get_instance_proc_addr = Some(get_instance_proc_addr);
    interface.pfn_get_device_proc_addr = Some(get_device_proc_addr);
    interface.pfn_get_physical_device_proc_addr = Some(get_physical_device_proc_addr);
    debug!(requested, "negotiated loader interface");
    vk::Result::SUCCESS
}

unsafe extern "system" fn create_instance(
    p_create_info: *const vk::InstanceCreateInfo,
    p_allocator: *const vk::AllocationCallbacks,
    p_instance: *mut vk::Instance,
) -> vk::Result {
    let Some(create_info) = p_create_info.as_ref() else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    match create_instance_chained(create_info, p_allocator.as_ref(), p_instance) {
        Ok(()) => vk::Result::SUCCESS,
        Err(err) => {
            warn!("instance creation failed: {}", err);
            err.into()
        }
    }
}

unsafe fn create_instance_chained(
    create_info: &vk::InstanceCreateInfo,
    allocator: Option<&vk::AllocationCallbacks>,
    p_instance: *mut vk::Instance,
) -> Result<(), LayerError> {
    let link_info = sys::find_instance_link(create_info).ok_or(LayerError::MissingLayerLink)?;
    let link = link_info.head().ok_or(LayerError::MissingLayerLink)?;
    let gipa = link.pfn_next_get_instance_proc_addr;
    let gpdpa = link.pfn_next_get_physical_device_proc_addr;

    let fp_create_instance = proc_addr!(gipa, vk::Instance::null(), "vkCreateInstance" as vk::PFN_vkCreateInstance)
        .ok_or(LayerError::MissingEntryPoint("vkCreateInstance"))?;

    // move chain on for next layer
    link_info.advance();
    fp_create_instance(create_info, allocator.as_raw_ptr(), p_instance).result()?;
    let instance = *p_instance;

    let chain = match InstanceDispatchTable::load(instance, gipa, gpdpa) {
        Ok(chain) => Arc::new(chain),
        Err(err) => {
            if let Some(destroy) = proc_addr!(gipa, instance, "vkDestroyInstance" as vk::PFN_vkDestroyInstance) {
                destroy(instance, allocator.as_raw_ptr());
            }
            return Err(err);
        }
    };

    let description = DeviceDescription::load(&LayerConfig::from_env());
    if let Err(err) = kernel().register_instance(instance, chain.clone(), description.as_ref()) {
        chain.destroy(instance, allocator);
        return Err(err);
    }
    Ok(())
}

unsafe extern "system" fn destroy_instance(instance: vk::Instance, p_allocator: *const vk::AllocationCallbacks) {
    kernel().destroy_instance(instance, p_allocator.as_ref());
}

unsafe extern "system" fn create_device(
    physical_device: vk::PhysicalDevice,
    p_create_info: *const vk::DeviceCreateInfo,
    p_allocator: *const vk::AllocationCallbacks,
    p_device: *mut vk::Device,
) -> vk::Result {
    let Some(create_info) = p_create_info.as_ref() else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    match create_device_chained(physical_device, create_info, p_allocator.as_ref(), p_device) {
        Ok(()) => vk::Result::SUCCESS,
        Err(err) => {
            warn!(?physical_device, "device creation failed: {}", err);
            err.into()
        }
    }
}

unsafe fn create_device_chained(
    physical_device: vk::PhysicalDevice,
    create_info: &vk::DeviceCreateInfo,
    allocator: Option<&vk::AllocationCallbacks>,
    p_device: *mut vk::Device,
) -> Result<(), LayerError> {
    let link_info = sys::find_device_link(create_info).ok_or(LayerError::MissingLayerLink)?;
    let link = link_info.head().ok_or(LayerError::MissingLayerLink)?;
    let gipa = link.pfn_next_get_instance_proc_addr;
    let gdpa = link.pfn_next_get_device_proc_addr;

    let instance = kernel()
        .physical_device_owner(normalized(physical_device))
        .unwrap_or_else(vk::Instance::null);
    let fp_create_device = proc_addr!(gipa, instance, "vkCreateDevice" as vk::PFN_vkCreateDevice)
        .ok_or(LayerError::MissingEntryPoint("vkCreateDevice"))?;

    link_info.advance();
    fp_create_device(physical_device, create_info, allocator.as_raw_ptr(), p_device).result()?;
    let device = *p_device;

    let chain = match DeviceDispatchTable::load(device, gdpa) {
        Ok(chain) => Arc::new(chain),
        Err(err) => {
            if let Some(destroy) = proc_addr!(gdpa, device, "vkDestroyDevice" as vk::PFN_vkDestroyDevice) {
                destroy(device, allocator.as_raw_ptr());
            }
            return Err(err);
        }
    };
    if chain.layer_spoof.is_some() {
        info!(?device, "a layer below also exposes {}", EXTENSION_NAME);
    }

    if let Err(err) = kernel().register_device(device, normalized(physical_device), chain.clone()) {
        (chain.destroy_device)(device, allocator.as_raw_ptr());
        return Err(err);
    }
    Ok(())
}

unsafe extern "system" fn destroy_device(device: vk::Device, p_allocator: *const vk::AllocationCallbacks) {
    kernel().destroy_device(device, p_allocator.as_ref());
}

unsafe extern "system" fn enumerate_physical_devices(
    instance: vk::Instance,
    p_physical_device_count: *mut u32,
    p_physical_devices: *mut vk::PhysicalDevice,
) -> vk::Result {
    let Some(chain) = kernel().instance_chain(instance) else {
        error!(?instance, "enumerating on unknown instance, chain lost");
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };

    let result = (chain.enumerate_physical_devices)(instance, p_physical_device_count, p_physical_devices);
    if matches!(result, vk::Result::SUCCESS | vk::Result::INCOMPLETE) && !p_physical_devices.is_null() {
        let physical_devices = std::slice::from_raw_parts(p_physical_devices, *p_physical_device_count as usize);
        if let Err(err) = kernel().note_physical_devices(instance, physical_devices) {
            return err.into();
        }
    }
    result
}

unsafe extern "system" fn get_physical_device_properties(
    physical_device: vk::PhysicalDevice,
    p_properties: *mut vk::PhysicalDeviceProperties,
) {
    let Some(properties) = p_properties.as_mut() else {
        return;
    };

    let key = normalized(physical_device);
    if let Some(current) = kernel().current_properties(key) {
        trace!(?physical_device, "serving recorded properties");
        *properties = current;
        return;
    }

    if let Some((physical_device, chain)) = owning_chain(physical_device) {
        (chain.get_physical_device_properties)(physical_device, properties);
    }
}

unsafe extern "system" fn get_physical_device_properties2(
    physical_device: vk::PhysicalDevice,
    p_properties: *mut vk::PhysicalDeviceProperties2,
) {
    let Some(properties) = p_properties.as_mut() else {
        return;
    };
    let Some((physical_device, chain)) = owning_chain(physical_device) else {
        return;
    };

    match chain.get_physical_device_properties2 {
        Some(next) => next(physical_device, properties),
        None => properties.properties = chain.device_properties(physical_device),
    }
    if let Some(current) = kernel().current_properties(physical_device) {
        trace!(?physical_device, "overlaying recorded properties");
        properties.properties = current;
    }
}

unsafe extern "system" fn get_physical_device_features(
    physical_device: vk::PhysicalDevice,
    p_features: *mut vk::PhysicalDeviceFeatures,
) {
    if let Some((physical_device, chain)) = owning_chain(physical_device) {
        (chain.get_physical_device_features)(physical_device, p_features);
    }
}

unsafe extern "system" fn get_physical_device_format_properties(
    physical_device: vk::PhysicalDevice,
    format: vk::Format,
    p_format_properties: *mut vk::FormatProperties,
) {
    if let Some((physical_device, chain)) = owning_chain(physical_device) {
        (chain.get_physical_device_format_properties)(physical_device, format, p_format_properties);
    }
}

unsafe extern "system" fn get_physical_device_image_format_properties(
    physical_device: vk::PhysicalDevice,
    format: vk::Format,
    ty: vk::ImageType,
    tiling: vk::ImageTiling,
    usage: vk::ImageUsageFlags,
    flags: vk::ImageCreateFlags,
    p_image_format_properties: *mut vk::ImageFormatProperties,
) -> vk::Result {
    match owning_chain(physical_device) {
        Some((physical_device, chain)) => (chain.get_physical_device_image_format_properties)(
            physical_device,
            format,
            ty,
            tiling,
            usage,
            flags,
            p_image_format_properties,
        ),
        None => vk::Result::ERROR_INITIALIZATION_FAILED,
    }
}

unsafe extern "system" fn get_physical_device_queue_family_properties(
    physical_device: vk::PhysicalDevice,
    p_queue_family_property_count: *mut u32,
    p_queue_family_properties: *mut vk::QueueFamilyProperties,
) {
    if let Some((physical_device, chain)) = owning_chain(physical_device) {
        (chain.get_physical_device_queue_family_properties)(
            physical_device,
            p_queue_family_property_count,
            p_queue_family_properties,
        );
    }
}

unsafe extern "system" fn get_physical_device_memory_properties(
    physical_device: vk::PhysicalDevice,
    p_memory_properties: *mut vk::PhysicalDeviceMemoryProperties,
) {
    if let Some((physical_device, chain)) = owning_chain(physical_device) {
        (chain.get_physical_device_memory_properties)(physical_device, p_memory_properties);
    }
}

pub unsafe extern "system" fn enumerate_instance_layer_properties(
    p_property_count: *mut u32,
    p_properties: *mut vk::LayerProperties,
) -> vk::Result {
    enumerate_properties(&LAYER_PROPERTIES, p_property_count, p_properties)
}

pub unsafe extern "system" fn enumerate_device_layer_properties(
    _physical_device: vk::PhysicalDevice,
    p_property_count: *mut u32,
    p_properties: *mut vk::LayerProperties,
) -> vk::Result {
    enumerate_properties(&LAYER_PROPERTIES, p_property_count, p_properties)
}

pub unsafe extern "system" fn enumerate_instance_extension_properties(
    p_layer_name: *const c_char,
    p_property_count: *mut u32,
    p_properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    if is_this_layer(p_layer_name) {
        return enumerate_properties(&INSTANCE_EXTENSIONS, p_property_count, p_properties);
    }
    vk::Result::ERROR_LAYER_NOT_PRESENT
}

pub unsafe extern "system" fn enumerate_device_extension_properties(
    physical_device: vk::PhysicalDevice,
    p_layer_name: *const c_char,
    p_property_count: *mut u32,
    p_properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    if is_this_layer(p_layer_name) {
        return enumerate_properties(&DEVICE_EXTENSIONS, p_property_count, p_properties);
    }
    if physical_device == vk::PhysicalDevice::null() {
        return vk::Result::ERROR_LAYER_NOT_PRESENT;
    }

    match owning_chain(physical_device) {
        Some((physical_device, chain)) => (chain.enumerate_device_extension_properties)(
            physical_device,
            p_layer_name,
            p_property_count,
            p_properties,
        ),
        None => vk::Result::ERROR_LAYER_NOT_PRESENT,
    }
}

unsafe extern "system" fn layer_spoof_ext(physical_device: vk::PhysicalDevice) -> vk::Result {
    let key = normalized(physical_device);
    if let Some(result) = kernel().forward_layer_spoof(key) {
        debug!(?physical_device, %result, "{} answered further down the chain", EXTENSION_NAME);
        return result;
    }
    debug!(?physical_device, "{} probed", EXTENSION_NAME);
    vk::Result::SUCCESS
}

unsafe extern "system" fn set_physical_device_limits_ext(
    physical_device: vk::PhysicalDevice,
    p_new_limits: *const vk::PhysicalDeviceLimits,
) -> vk::Result {
    let key = normalized(physical_device);
    match kernel().set_limits(key, p_new_limits.as_ref()) {
        Ok(true) => debug!(?physical_device, ?key, replaced = !p_new_limits.is_null(), "limits set"),
        Ok(false) => {}
        Err(err) => warn!(?physical_device, "unable to record limits: {}", err),
    }
    vk::Result::SUCCESS
}

unsafe extern "system" fn get_original_physical_device_limits_ext(
    physical_device: vk::PhysicalDevice,
    p_original_limits: *mut vk::PhysicalDeviceLimits,
) {
    let Some(original_limits) = p_original_limits.as_mut() else {
        return;
    };
    match kernel().original_limits(normalized(physical_device)) {
        Some(limits) => *original_limits = limits,
        None => warn!(?physical_device, "original limits requested for unknown physical device"),
    }
}

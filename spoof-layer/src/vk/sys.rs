use std::ffi::{c_char, c_void};

use ash::vk;
use ash::vk::Handle;
use static_assertions::assert_eq_size;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug)]
#[repr(transparent)]
#[must_use]
pub struct VkLayerNegotiateStructType(pub(crate) i32);
impl VkLayerNegotiateStructType {
    pub const LAYER_NEGOTIATE_INTERFACE_STRUCT: Self = Self(1);
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug)]
#[repr(transparent)]
#[must_use]
pub struct VkLayerFunction(pub(crate) i32);
impl VkLayerFunction {
    pub const VK_LAYER_FUNCTION_LINK: Self = Self(0);
    #[allow(dead_code)]
    pub const VK_LAYER_FUNCTION_DATA_CALLBACK: Self = Self(1);
}

pub const LAYER_INTERFACE_VERSION: u32 = 2;

// typedef PFN_vkVoidFunction (VKAPI_PTR *PFN_GetPhysicalDeviceProcAddr)(VkInstance instance, const char* pName);
#[allow(non_camel_case_types)]
pub type PFN_GetPhysicalDeviceProcAddr =
    unsafe extern "system" fn(instance: vk::Instance, p_name: *const c_char) -> vk::PFN_vkVoidFunction;

#[allow(non_camel_case_types)]
pub type PFN_vkLayerSpoofEXT = unsafe extern "system" fn(physical_device: vk::PhysicalDevice) -> vk::Result;

#[allow(non_camel_case_types)]
pub type PFN_vkSetPhysicalDeviceLimitsEXT = unsafe extern "system" fn(
    physical_device: vk::PhysicalDevice,
    p_new_limits: *const vk::PhysicalDeviceLimits,
) -> vk::Result;

#[allow(non_camel_case_types)]
pub type PFN_vkGetOriginalPhysicalDeviceLimitsEXT =
    unsafe extern "system" fn(physical_device: vk::PhysicalDevice, p_original_limits: *mut vk::PhysicalDeviceLimits);

#[repr(C)]
pub struct VkLayerInstanceCreateInfo {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub function: VkLayerFunction,
    // A union in the loader headers. Only the link member is ever read.
    pub p_layer_info: *mut VkLayerInstanceLink,
}

#[repr(C)]
pub struct VkLayerInstanceLink {
    pub p_next: *mut VkLayerInstanceLink,
    pub pfn_next_get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    pub pfn_next_get_physical_device_proc_addr: Option<PFN_GetPhysicalDeviceProcAddr>,
}

#[repr(C)]
pub struct VkLayerDeviceCreateInfo {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub function: VkLayerFunction,
    pub p_layer_info: *mut VkLayerDeviceLink,
}

#[repr(C)]
pub struct VkLayerDeviceLink {
    pub p_next: *mut VkLayerDeviceLink,
    pub pfn_next_get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    pub pfn_next_get_device_proc_addr: vk::PFN_vkGetDeviceProcAddr,
}

#[repr(C)]
pub struct VkNegotiateLayerInterface {
    pub s_type: VkLayerNegotiateStructType,
    pub p_next: *const c_void,
    pub loader_layer_interface_version: u32,
    pub pfn_get_instance_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
    pub pfn_get_device_proc_addr: Option<vk::PFN_vkGetDeviceProcAddr>,
    pub pfn_get_physical_device_proc_addr: Option<PFN_GetPhysicalDeviceProcAddr>,
}

/// Layout of the object the loader hands out in place of a driver physical device.
#[repr(C)]
pub struct LoaderPhysicalDeviceTrampoline {
    pub dispatch: *const c_void,
    pub instance: *const c_void,
    pub physical_device: vk::PhysicalDevice,
}

assert_eq_size!(VkLayerInstanceLink, [usize; 3]);
assert_eq_size!(VkLayerDeviceLink, [usize; 3]);
assert_eq_size!(LoaderPhysicalDeviceTrampoline, [usize; 3]);
assert_eq_size!(VkNegotiateLayerInterface, [usize; 6]);

/// Walks a create info `p_next` chain for the loader's link entry with structure type
/// `s_type`. The loader's create info headers share a common prefix, so every entry is read
/// as `VkLayerInstanceCreateInfo` until a match is found.
unsafe fn find_link_info<T>(mut p_next: *const c_void, s_type: vk::StructureType) -> Option<*mut T> {
    while let Some(info) = p_next.cast::<VkLayerInstanceCreateInfo>().as_ref() {
        if info.s_type == s_type && info.function == VkLayerFunction::VK_LAYER_FUNCTION_LINK {
            return Some(p_next.cast::<T>().cast_mut());
        }
        p_next = info.p_next;
    }
    None
}

/// Finds the instance link info in the `p_next` chain of `create_info`.
///
/// SAFETY: `create_info` must come from the loader and point to a valid chain.
pub unsafe fn find_instance_link(create_info: &vk::InstanceCreateInfo) -> Option<&mut VkLayerInstanceCreateInfo> {
    find_link_info::<VkLayerInstanceCreateInfo>(create_info.p_next, vk::StructureType::LOADER_INSTANCE_CREATE_INFO)?
        .as_mut()
}

/// Finds the device link info in the `p_next` chain of `create_info`.
///
/// SAFETY: `create_info` must come from the loader and point to a valid chain.
pub unsafe fn find_device_link(create_info: &vk::DeviceCreateInfo) -> Option<&mut VkLayerDeviceCreateInfo> {
    find_link_info::<VkLayerDeviceCreateInfo>(create_info.p_next, vk::StructureType::LOADER_DEVICE_CREATE_INFO)?
        .as_mut()
}

impl VkLayerInstanceCreateInfo {
    /// The link describing the layer directly below this one.
    pub unsafe fn head(&self) -> Option<&VkLayerInstanceLink> {
        self.p_layer_info.as_ref()
    }

    /// Moves the head on so the next layer sees its own link.
    pub unsafe fn advance(&mut self) {
        if let Some(link) = self.p_layer_info.as_ref() {
            self.p_layer_info = link.p_next;
        }
    }
}

impl VkLayerDeviceCreateInfo {
    pub unsafe fn head(&self) -> Option<&VkLayerDeviceLink> {
        self.p_layer_info.as_ref()
    }

    pub unsafe fn advance(&mut self) {
        if let Some(link) = self.p_layer_info.as_ref() {
            self.p_layer_info = link.p_next;
        }
    }
}

/// Reads the driver handle a loader trampoline wraps.
///
/// SAFETY: `physical_device` must be a live dispatchable handle. Only the first three
/// pointer-sized words are read.
pub unsafe fn unwrap_physical_device(physical_device: vk::PhysicalDevice) -> Option<vk::PhysicalDevice> {
    let trampoline = (physical_device.as_raw() as usize as *const LoaderPhysicalDeviceTrampoline).as_ref()?;
    let inner = trampoline.physical_device;
    (inner != vk::PhysicalDevice::null()).then_some(inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    unsafe extern "system" fn null_gipa(_instance: vk::Instance, _name: *const c_char) -> vk::PFN_vkVoidFunction {
        None
    }

    unsafe extern "system" fn null_gdpa(_device: vk::Device, _name: *const c_char) -> vk::PFN_vkVoidFunction {
        None
    }

    #[test]
    fn finds_link_behind_other_entries() {
        let mut tail = VkLayerInstanceLink {
            p_next: ptr::null_mut(),
            pfn_next_get_instance_proc_addr: null_gipa,
            pfn_next_get_physical_device_proc_addr: None,
        };
        let mut head = VkLayerInstanceLink {
            p_next: &mut tail,
            pfn_next_get_instance_proc_addr: null_gipa,
            pfn_next_get_physical_device_proc_addr: None,
        };
        let mut link = VkLayerInstanceCreateInfo {
            s_type: vk::StructureType::LOADER_INSTANCE_CREATE_INFO,
            p_next: ptr::null(),
            function: VkLayerFunction::VK_LAYER_FUNCTION_LINK,
            p_layer_info: &mut head,
        };
        let callback = VkLayerInstanceCreateInfo {
            s_type: vk::StructureType::LOADER_INSTANCE_CREATE_INFO,
            p_next: ptr::addr_of_mut!(link).cast_const().cast(),
            function: VkLayerFunction::VK_LAYER_FUNCTION_DATA_CALLBACK,
            p_layer_info: ptr::null_mut(),
        };
        let create_info = vk::InstanceCreateInfo {
            p_next: (&callback as *const VkLayerInstanceCreateInfo).cast(),
            ..Default::default()
        };

        unsafe {
            let found = find_instance_link(&create_info).unwrap();
            assert!(ptr::eq(found.head().unwrap(), &head));
            found.advance();
            assert!(ptr::eq(found.head().unwrap(), &tail));
            found.advance();
            assert!(found.head().is_none());
        }
    }

    #[test]
    fn missing_link_is_none() {
        let create_info = vk::DeviceCreateInfo::default();
        assert!(unsafe { find_device_link(&create_info) }.is_none());

        let mut link = VkLayerDeviceLink {
            p_next: ptr::null_mut(),
            pfn_next_get_instance_proc_addr: null_gipa,
            pfn_next_get_device_proc_addr: null_gdpa,
        };
        // An instance link does not satisfy a device lookup.
        let wrong_scope = VkLayerDeviceCreateInfo {
            s_type: vk::StructureType::LOADER_INSTANCE_CREATE_INFO,
            p_next: ptr::null(),
            function: VkLayerFunction::VK_LAYER_FUNCTION_LINK,
            p_layer_info: &mut link,
        };
        let create_info = vk::DeviceCreateInfo {
            p_next: (&wrong_scope as *const VkLayerDeviceCreateInfo).cast(),
            ..Default::default()
        };
        assert!(unsafe { find_device_link(&create_info) }.is_none());
    }

    #[test]
    fn unwraps_trampoline() {
        let trampoline = LoaderPhysicalDeviceTrampoline {
            dispatch: ptr::null(),
            instance: ptr::null(),
            physical_device: vk::PhysicalDevice::from_raw(0x1234),
        };
        let wrapped = vk::PhysicalDevice::from_raw(&trampoline as *const _ as u64);
        assert_eq!(
            unsafe { unwrap_physical_device(wrapped) },
            Some(vk::PhysicalDevice::from_raw(0x1234))
        );
        assert_eq!(unsafe { unwrap_physical_device(vk::PhysicalDevice::null()) }, None);
    }
}

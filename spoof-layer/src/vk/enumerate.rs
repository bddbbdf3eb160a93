use std::ffi::{c_char, CStr};
use std::slice;

use ash::vk;

use crate::common::c_char_array;

pub const LAYER_NAME: &str = "VK_LAYER_spoof_device";
pub const EXTENSION_NAME: &str = "vkLayerSpoofEXT";

pub static LAYER_PROPERTIES: [vk::LayerProperties; 1] = [vk::LayerProperties {
    layer_name: c_char_array(LAYER_NAME),
    spec_version: vk::make_api_version(0, 1, 3, vk::HEADER_VERSION),
    implementation_version: 1,
    description: c_char_array("Overrides reported physical device properties and limits"),
}];

pub static DEVICE_EXTENSIONS: [vk::ExtensionProperties; 1] = [vk::ExtensionProperties {
    extension_name: c_char_array(EXTENSION_NAME),
    spec_version: 1,
}];

pub static INSTANCE_EXTENSIONS: [vk::ExtensionProperties; 0] = [];

/// Copies as much of `available` as fits into `dst`.
///
/// Returns the count to report and the status. A short buffer reports the full available
/// count with `INCOMPLETE`.
pub fn copy_properties<T: Copy>(available: &[T], dst: &mut [T]) -> (u32, vk::Result) {
    let copied = available.len().min(dst.len());
    dst[..copied].copy_from_slice(&available[..copied]);

    if copied < available.len() {
        (available.len() as u32, vk::Result::INCOMPLETE)
    } else {
        (copied as u32, vk::Result::SUCCESS)
    }
}

/// Two-phase enumeration over raw loader pointers.
///
/// SAFETY: `p_count` must be valid for reads and writes, and `p_properties`, when not null,
/// must be valid for `*p_count` writes.
pub unsafe fn enumerate_properties<T: Copy>(available: &[T], p_count: *mut u32, p_properties: *mut T) -> vk::Result {
    let Some(count) = p_count.as_mut() else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };

    if p_properties.is_null() {
        *count = available.len() as u32;
        return vk::Result::SUCCESS;
    }

    let dst: &mut [T] = match *count {
        0 => &mut [],
        n => slice::from_raw_parts_mut(p_properties, n as usize),
    };
    let (reported, result) = copy_properties(available, dst);
    *count = reported;
    result
}

/// Whether `p_layer_name` names this layer. A null name never does.
pub unsafe fn is_this_layer(p_layer_name: *const c_char) -> bool {
    !p_layer_name.is_null() && CStr::from_ptr(p_layer_name).to_bytes() == LAYER_NAME.as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::read_c_str;
    use std::ptr;

    #[test]
    fn null_buffer_reports_count() {
        let mut count = 0;
        let result = unsafe { enumerate_properties(&LAYER_PROPERTIES, &mut count, ptr::null_mut()) };
        assert_eq!(result, vk::Result::SUCCESS);
        assert_eq!(count, 1);
    }

    #[test]
    fn empty_buffer_is_incomplete() {
        let mut count = 0;
        let mut buffer = [vk::LayerProperties::default(); 1];
        let result = unsafe { enumerate_properties(&LAYER_PROPERTIES, &mut count, buffer.as_mut_ptr()) };
        assert_eq!(result, vk::Result::INCOMPLETE);
        assert_eq!(count, 1);
        assert_eq!(buffer[0].layer_name[0], 0);
    }

    #[test]
    fn fitting_buffer_copies() {
        let mut count = 4;
        let mut buffer = [vk::ExtensionProperties::default(); 4];
        let result = unsafe { enumerate_properties(&DEVICE_EXTENSIONS, &mut count, buffer.as_mut_ptr()) };
        assert_eq!(result, vk::Result::SUCCESS);
        assert_eq!(count, 1);
        assert_eq!(read_c_str(&buffer[0].extension_name), EXTENSION_NAME);
        assert_eq!(buffer[0].spec_version, 1);
    }

    #[test]
    fn short_slice_copies_prefix() {
        let mut dst = [0u32; 2];
        assert_eq!(copy_properties(&[7, 8, 9], &mut dst), (3, vk::Result::INCOMPLETE));
        assert_eq!(dst, [7, 8]);
        assert_eq!(copy_properties::<u32>(&[], &mut dst), (0, vk::Result::SUCCESS));
    }

    #[test]
    fn self_description() {
        let layer = &LAYER_PROPERTIES[0];
        assert_eq!(read_c_str(&layer.layer_name), LAYER_NAME);
        assert_eq!(vk::api_version_minor(layer.spec_version), 3);
        assert!(read_c_str(&layer.description).starts_with("Overrides"));

        assert!(unsafe { is_this_layer(b"VK_LAYER_spoof_device\0".as_ptr().cast()) });
        assert!(!unsafe { is_this_layer(b"VK_LAYER_KHRONOS_validation\0".as_ptr().cast()) });
        assert!(!unsafe { is_this_layer(ptr::null()) });
    }
}

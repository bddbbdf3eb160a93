use ash::prelude::VkResult;
use ash::vk;

/// Instance-scope entry points of the next layer in the call chain.
///
/// An implementation is resolved once when an instance is created and lives exactly as long
/// as the instance. Handles passed in must be ones the same chain handed out.
pub trait InstanceChain: Send + Sync {
    fn enumerate_devices(&self, instance: vk::Instance) -> VkResult<Vec<vk::PhysicalDevice>>;

    /// Asks the next layer for the properties of a physical device. This always reaches down
    /// the chain and never observes overrides applied by this layer.
    fn device_properties(&self, physical_device: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties;

    fn destroy(&self, instance: vk::Instance, allocator: Option<&vk::AllocationCallbacks>);
}

/// Device-scope entry points of the next layer in the call chain.
pub trait DeviceChain: Send + Sync {
    fn destroy(&self, device: vk::Device, allocator: Option<&vk::AllocationCallbacks>);

    /// Hands the `vkLayerSpoofEXT` probe to a layer further down. `None` if no layer below
    /// implements it.
    fn forward_layer_spoof(&self, physical_device: vk::PhysicalDevice) -> Option<vk::Result>;
}

use ash::vk;
use indexmap::map::Entry;
use indexmap::IndexMap;

/// Original and currently exposed properties of one physical device.
#[derive(Clone, Copy, Debug)]
pub struct DeviceRecord {
    owner: vk::Instance,
    original: vk::PhysicalDeviceProperties,
    current: vk::PhysicalDeviceProperties,
}

impl DeviceRecord {
    fn capture(owner: vk::Instance, properties: vk::PhysicalDeviceProperties) -> DeviceRecord {
        DeviceRecord {
            owner,
            original: properties,
            current: properties,
        }
    }

    /// The instance the device was observed through, or null if unknown.
    pub fn owner(&self) -> vk::Instance {
        self.owner
    }

    /// Properties as the driver reported them when the record was captured.
    pub fn original(&self) -> &vk::PhysicalDeviceProperties {
        &self.original
    }

    /// Properties as exposed to the application.
    pub fn current(&self) -> &vk::PhysicalDeviceProperties {
        &self.current
    }

    pub(crate) fn current_mut(&mut self) -> &mut vk::PhysicalDeviceProperties {
        &mut self.current
    }
}

/// Per physical device table of captured properties, in capture order.
///
/// The store does no locking of its own; the kernel owns it behind the same lock as the
/// instance and device registries.
#[derive(Default)]
pub struct DeviceRecordStore {
    records: IndexMap<vk::PhysicalDevice, DeviceRecord>,
}

impl DeviceRecordStore {
    pub fn new() -> DeviceRecordStore {
        DeviceRecordStore::default()
    }

    /// Returns the record for `physical_device`, capturing it with a single call to `query`
    /// if none exists yet. The flag is `true` when this call captured the record.
    pub fn ensure_captured(
        &mut self,
        physical_device: vk::PhysicalDevice,
        owner: vk::Instance,
        query: impl FnOnce() -> vk::PhysicalDeviceProperties,
    ) -> (&mut DeviceRecord, bool) {
        match self.records.entry(physical_device) {
            Entry::Occupied(entry) => (entry.into_mut(), false),
            Entry::Vacant(entry) => (entry.insert(DeviceRecord::capture(owner, query())), true),
        }
    }

    pub fn get(&self, physical_device: vk::PhysicalDevice) -> Option<&DeviceRecord> {
        self.records.get(&physical_device)
    }

    pub fn current_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Option<vk::PhysicalDeviceProperties> {
        self.get(physical_device).map(|record| record.current)
    }

    /// Replaces the limits of the current properties, capturing the record first if needed.
    pub fn set_limits(
        &mut self,
        physical_device: vk::PhysicalDevice,
        owner: vk::Instance,
        limits: &vk::PhysicalDeviceLimits,
        query: impl FnOnce() -> vk::PhysicalDeviceProperties,
    ) {
        let (record, _) = self.ensure_captured(physical_device, owner, query);
        record.current.limits = *limits;
    }

    /// Re-reads the limits from the driver. The stored snapshot is deliberately not
    /// consulted.
    pub fn original_limits(
        query: impl FnOnce() -> vk::PhysicalDeviceProperties,
    ) -> vk::PhysicalDeviceLimits {
        query().limits
    }

    pub fn try_reserve(&mut self, additional: usize) -> Result<(), indexmap::TryReserveError> {
        self.records.try_reserve(additional)
    }

    /// Moves every record owned by `owner` to the instance `successor` names for its device.
    /// Records left without a successor are dropped. Returns the number dropped.
    pub fn hand_over(
        &mut self,
        owner: vk::Instance,
        mut successor: impl FnMut(vk::PhysicalDevice) -> Option<vk::Instance>,
    ) -> usize {
        let before = self.records.len();
        self.records.retain(|&physical_device, record| {
            if record.owner != owner {
                return true;
            }
            match successor(physical_device) {
                Some(next) => {
                    record.owner = next;
                    true
                }
                None => false,
            }
        });
        before - self.records.len()
    }

    pub fn contains(&self, physical_device: vk::PhysicalDevice) -> bool {
        self.records.contains_key(&physical_device)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

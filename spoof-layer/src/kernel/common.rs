use std::sync::Arc;

use ash::vk;
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::common::LayerError;
use crate::hook::{DeviceChain, InstanceChain};
use crate::kernel::store::{DeviceRecord, DeviceRecordStore};
use crate::overlay::DeviceDescription;

/// Registries and device records shared by every entry point.
///
/// All tables live behind one lock. Plain forwards only take it long enough to clone the
/// chain they need; capture holds it across the driver query so that racing callers observe
/// a single record.
pub struct KernelContext<I, D> {
    state: Mutex<KernelState<I, D>>,
}

struct KernelState<I, D> {
    instances: IndexMap<vk::Instance, Arc<I>>,
    devices: IndexMap<vk::Device, DeviceEntry<D>>,
    /// Live instances that enumerated each physical device, in registration order. The first
    /// one owns the device and its record.
    owners: IndexMap<vk::PhysicalDevice, IndexSet<vk::Instance>>,
    records: DeviceRecordStore,
}

struct DeviceEntry<D> {
    physical_device: vk::PhysicalDevice,
    chain: Arc<D>,
}

impl<I, D> KernelState<I, D> {
    fn knows(&self, physical_device: vk::PhysicalDevice) -> bool {
        self.owners.contains_key(&physical_device) || self.records.contains(physical_device)
    }

    fn owner(&self, physical_device: vk::PhysicalDevice) -> Option<vk::Instance> {
        self.owners.get(&physical_device)?.first().copied()
    }

    fn owner_chain(&self, physical_device: vk::PhysicalDevice) -> Option<(vk::Instance, Arc<I>)> {
        let owner = self.owner(physical_device)?;
        let chain = self.instances.get(&owner)?;
        Some((owner, chain.clone()))
    }

    /// Reserves room for `instance` to claim each of `physical_devices`.
    fn reserve_claims(&mut self, physical_devices: &[vk::PhysicalDevice]) -> Result<(), LayerError> {
        self.owners.try_reserve(physical_devices.len())?;
        for physical_device in physical_devices {
            if let Some(claims) = self.owners.get_mut(physical_device) {
                claims.try_reserve(1)?;
            }
        }
        Ok(())
    }

    /// Adds `instance` to the claimants of `physical_device`. An existing owner stays owner.
    fn claim(&mut self, physical_device: vk::PhysicalDevice, instance: vk::Instance) {
        self.owners.entry(physical_device).or_default().insert(instance);
    }
}

impl<I: InstanceChain, D: DeviceChain> Default for KernelContext<I, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: InstanceChain, D: DeviceChain> KernelContext<I, D> {
    pub fn new() -> KernelContext<I, D> {
        KernelContext {
            state: Mutex::new(KernelState {
                instances: IndexMap::new(),
                devices: IndexMap::new(),
                owners: IndexMap::new(),
                records: DeviceRecordStore::new(),
            }),
        }
    }

    /// Registers a freshly created instance and captures every physical device it
    /// enumerates, overlaying `description` onto each newly captured record.
    ///
    /// Space for every table is reserved up front. On failure nothing is registered and the
    /// caller is expected to tear the downstream instance down again.
    pub fn register_instance(
        &self,
        instance: vk::Instance,
        chain: Arc<I>,
        description: Option<&DeviceDescription>,
    ) -> Result<usize, LayerError> {
        let physical_devices = match chain.enumerate_devices(instance) {
            Ok(physical_devices) => physical_devices,
            Err(result) => {
                warn!(?instance, %result, "unable to enumerate physical devices, nothing captured");
                Vec::new()
            }
        };

        let mut state = self.state.lock();
        state.instances.try_reserve(1)?;
        state.reserve_claims(&physical_devices)?;
        state.records.try_reserve(physical_devices.len())?;

        let mut captured = 0;
        for &physical_device in &physical_devices {
            state.claim(physical_device, instance);
            let (record, fresh) = state
                .records
                .ensure_captured(physical_device, instance, || chain.device_properties(physical_device));
            if !fresh {
                debug!(?physical_device, owner = ?record.owner(), "already captured, keeping existing record");
                continue;
            }

            captured += 1;
            let applied = description.map_or(0, |description| description.apply(record.current_mut()));
            debug!(?physical_device, applied, "captured physical device");
        }

        state.instances.insert(instance, chain);
        info!(?instance, devices = physical_devices.len(), captured, "instance registered");
        Ok(captured)
    }

    /// Forwards the destruction downstream, then drops the instance entry and its claims.
    /// Records it owned move to the next instance still claiming the device, or are evicted
    /// when none is left.
    pub fn destroy_instance(&self, instance: vk::Instance, allocator: Option<&vk::AllocationCallbacks>) -> bool {
        let Some(chain) = self.instance_chain(instance) else {
            error!(?instance, "destroying unknown instance, chain lost");
            return false;
        };
        chain.destroy(instance, allocator);

        let mut state = self.state.lock();
        let KernelState {
            instances,
            owners,
            records,
            ..
        } = &mut *state;
        instances.swap_remove(&instance);
        owners.retain(|_, claims| {
            claims.shift_remove(&instance);
            !claims.is_empty()
        });
        let evicted = records.hand_over(instance, |physical_device| {
            owners.get(&physical_device).and_then(|claims| claims.first().copied())
        });
        info!(?instance, evicted, "instance destroyed");
        true
    }

    pub fn register_device(
        &self,
        device: vk::Device,
        physical_device: vk::PhysicalDevice,
        chain: Arc<D>,
    ) -> Result<(), LayerError> {
        let mut state = self.state.lock();
        state.devices.try_reserve(1)?;
        state.devices.insert(device, DeviceEntry { physical_device, chain });
        debug!(?device, ?physical_device, "device registered");
        Ok(())
    }

    pub fn destroy_device(&self, device: vk::Device, allocator: Option<&vk::AllocationCallbacks>) -> bool {
        let Some(chain) = self.device_chain(device) else {
            error!(?device, "destroying unknown device, chain lost");
            return false;
        };
        chain.destroy(device, allocator);

        self.state.lock().devices.swap_remove(&device);
        debug!(?device, "device destroyed");
        true
    }

    pub fn instance_chain(&self, instance: vk::Instance) -> Option<Arc<I>> {
        self.state.lock().instances.get(&instance).cloned()
    }

    pub fn device_chain(&self, device: vk::Device) -> Option<Arc<D>> {
        self.state.lock().devices.get(&device).map(|entry| entry.chain.clone())
    }

    /// Offers the extension probe to the layers below the devices created on
    /// `physical_device`, in creation order. The first answer wins.
    pub fn forward_layer_spoof(&self, physical_device: vk::PhysicalDevice) -> Option<vk::Result> {
        let chains: Vec<Arc<D>> = self
            .state
            .lock()
            .devices
            .values()
            .filter(|entry| entry.physical_device == physical_device)
            .map(|entry| entry.chain.clone())
            .collect();
        chains.iter().find_map(|chain| chain.forward_layer_spoof(physical_device))
    }

    /// Chain of the instance that enumerated `physical_device`.
    pub fn physical_device_chain(&self, physical_device: vk::PhysicalDevice) -> Option<Arc<I>> {
        self.state.lock().owner_chain(physical_device).map(|(_, chain)| chain)
    }

    pub fn physical_device_owner(&self, physical_device: vk::PhysicalDevice) -> Option<vk::Instance> {
        self.state.lock().owner(physical_device)
    }

    /// Associates enumerated handles with `instance`. Handles already owned keep their owner.
    pub fn note_physical_devices(
        &self,
        instance: vk::Instance,
        physical_devices: &[vk::PhysicalDevice],
    ) -> Result<(), LayerError> {
        let mut state = self.state.lock();
        state.reserve_claims(physical_devices)?;
        for &physical_device in physical_devices {
            state.claim(physical_device, instance);
        }
        Ok(())
    }

    /// Maps `physical_device` onto the handle the tables are keyed by. A known handle is kept.
    /// Otherwise `unwrap` may produce the inner handle of a loader trampoline, which is used
    /// only if it is known.
    pub fn normalize(
        &self,
        physical_device: vk::PhysicalDevice,
        unwrap: impl FnOnce(vk::PhysicalDevice) -> Option<vk::PhysicalDevice>,
    ) -> vk::PhysicalDevice {
        let state = self.state.lock();
        if state.knows(physical_device) {
            return physical_device;
        }
        match unwrap(physical_device) {
            Some(inner) if state.knows(inner) => {
                debug!(?physical_device, ?inner, "unwrapped loader trampoline");
                inner
            }
            _ => physical_device,
        }
    }

    /// Returns the record for `physical_device`, capturing it from the owning instance's chain
    /// if needed. `None` if the device was never enumerated through a registered instance.
    pub fn ensure_captured(&self, physical_device: vk::PhysicalDevice) -> Result<Option<DeviceRecord>, LayerError> {
        let mut state = self.state.lock();
        if let Some(record) = state.records.get(physical_device) {
            return Ok(Some(*record));
        }
        let Some((owner, chain)) = state.owner_chain(physical_device) else {
            return Ok(None);
        };

        state.records.try_reserve(1)?;
        let (record, _) = state
            .records
            .ensure_captured(physical_device, owner, || chain.device_properties(physical_device));
        debug!(?physical_device, "captured physical device on demand");
        Ok(Some(*record))
    }

    pub fn current_properties(&self, physical_device: vk::PhysicalDevice) -> Option<vk::PhysicalDeviceProperties> {
        self.state.lock().records.current_properties(physical_device)
    }

    /// Replaces the exposed limits of `physical_device`, capturing it first if needed. With no
    /// limits the device is only captured. Returns `false` if the device has no known owner.
    pub fn set_limits(
        &self,
        physical_device: vk::PhysicalDevice,
        limits: Option<&vk::PhysicalDeviceLimits>,
    ) -> Result<bool, LayerError> {
        let Some(limits) = limits else {
            return Ok(self.ensure_captured(physical_device)?.is_some());
        };

        let mut state = self.state.lock();
        let Some((owner, chain)) = state.owner_chain(physical_device) else {
            warn!(?physical_device, "set limits on unknown physical device ignored");
            return Ok(false);
        };

        state.records.try_reserve(1)?;
        state
            .records
            .set_limits(physical_device, owner, limits, || chain.device_properties(physical_device));
        debug!(?physical_device, "limits replaced");
        Ok(true)
    }

    /// Asks the driver for the limits of `physical_device`. Stored records are not consulted.
    pub fn original_limits(&self, physical_device: vk::PhysicalDevice) -> Option<vk::PhysicalDeviceLimits> {
        let chain = self.physical_device_chain(physical_device)?;
        Some(DeviceRecordStore::original_limits(|| chain.device_properties(physical_device)))
    }

    #[cfg(test)]
    fn record_count(&self) -> usize {
        self.state.lock().records.len()
    }
}

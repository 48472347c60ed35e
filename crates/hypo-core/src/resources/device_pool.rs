use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::error::poisoned;
use crate::models::{CoreError, CoreErrorKind, CoreResult, Subsystem};

/// Round-robin pool of device ids, one slot per worker.
///
/// Slots are built by cycling through the visible devices, so with more
/// workers than devices an id appears several times. The id is only an
/// environment hint for the child process, not an exclusivity guarantee.
#[derive(Debug)]
pub struct DevicePool {
    slots: Mutex<Vec<u32>>,
    devices: BTreeSet<u32>,
    worker_count: usize,
}

impl DevicePool {
    pub fn new(device_ids: &BTreeSet<u32>, worker_count: usize) -> CoreResult<Self> {
        if device_ids.is_empty() {
            return Err(devices_error(
                CoreErrorKind::InvalidInput,
                "device pool needs at least one device id".to_string(),
            ));
        }
        if worker_count == 0 {
            return Err(devices_error(
                CoreErrorKind::InvalidInput,
                "device pool needs at least one worker".to_string(),
            ));
        }

        let ordered: Vec<u32> = device_ids.iter().copied().collect();
        let slots: Vec<u32> = (0..worker_count)
            .map(|index| ordered[index % ordered.len()])
            .collect();

        tracing::info!(visible = ?ordered, "visible devices");
        if worker_count > ordered.len() {
            tracing::warn!(
                workers = worker_count,
                devices = ordered.len(),
                "more workers than devices; some devices will run several tasks at once"
            );
        }
        tracing::info!(slots = ?slots, "device slots");

        Ok(Self {
            slots: Mutex::new(slots),
            devices: device_ids.clone(),
            worker_count,
        })
    }

    pub fn acquire(&self) -> CoreResult<u32> {
        self.lock_slots()?.pop().ok_or_else(|| {
            devices_error(
                CoreErrorKind::ResourceExhausted,
                format!(
                    "device pool is empty with {} workers configured",
                    self.worker_count
                ),
            )
        })
    }

    pub fn release(&self, id: u32) -> CoreResult<()> {
        if !self.devices.contains(&id) {
            return Err(devices_error(
                CoreErrorKind::InvariantViolation,
                format!("device '{id}' does not belong to this pool"),
            ));
        }

        let mut slots = self.lock_slots()?;
        if slots.len() >= self.worker_count {
            return Err(devices_error(
                CoreErrorKind::InvariantViolation,
                format!("device '{id}' released while no lease was outstanding"),
            ));
        }
        slots.push(id);
        Ok(())
    }

    /// Leases an id that returns to the pool when the guard drops.
    pub fn lease(self: &Arc<Self>) -> CoreResult<DeviceLease> {
        let id = self.acquire()?;
        Ok(DeviceLease {
            pool: Arc::clone(self),
            id,
            released: false,
        })
    }

    /// Ids currently available.
    pub fn len(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn leased(&self) -> usize {
        self.worker_count.saturating_sub(self.len())
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn devices(&self) -> &BTreeSet<u32> {
        &self.devices
    }

    fn lock_slots(&self) -> CoreResult<MutexGuard<'_, Vec<u32>>> {
        self.slots
            .lock()
            .map_err(|_| poisoned(Subsystem::Devices, "device pool"))
    }
}

#[derive(Debug)]
pub struct DeviceLease {
    pool: Arc<DevicePool>,
    id: u32,
    released: bool,
}

impl DeviceLease {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn release(mut self) -> CoreResult<()> {
        self.released = true;
        self.pool.release(self.id)
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(error) = self.pool.release(self.id) {
            tracing::error!(
                device = self.id,
                kind = ?error.kind,
                message = %error.message,
                "failed to return device lease"
            );
        }
    }
}

fn devices_error(kind: CoreErrorKind, message: String) -> CoreError {
    CoreError::new(Subsystem::Devices, kind, message)
}

//! Shared mapping holding the [`Region`].
//!
//! Created by the orchestrator before any fork; children inherit the
//! mapping, so no reopen path is needed in the workers themselves.

use harrow_core::context::Region;
use shared_memory::{Shmem, ShmemConf, ShmemError};

/// Owns the OS mapping and hands out the region view. The `Shmem` must
/// outlive every reference to the region, so the two travel together.
pub struct RegionShm {
    // field order matters for drop only in the owner process
    region: &'static Region,
    _shm: Shmem,
}

impl RegionShm {
    /// Create the mapping for this run. The id embeds the pid so
    /// leftovers from a crashed previous run never collide.
    pub fn create() -> Result<RegionShm, ShmemError> {
        let id = format!("harrow-region-{}", std::process::id());
        let size = Region::required_size();
        let shm = match ShmemConf::new().os_id(&id).size(size).create() {
            Ok(mut shm) => {
                shm.set_owner(true);
                shm
            }
            Err(ShmemError::MappingIdExists) => ShmemConf::new().os_id(&id).open()?,
            Err(e) => return Err(e),
        };
        let ptr = shm.as_ptr();
        unsafe {
            std::ptr::write_bytes(ptr, 0, size);
        }
        let region = unsafe { Region::from_ptr(ptr) };
        Ok(RegionShm { region, _shm: shm })
    }

    #[inline]
    pub fn region(&self) -> &'static Region {
        self.region
    }
}

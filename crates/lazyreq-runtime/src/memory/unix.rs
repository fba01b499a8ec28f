//! Unix memory implementation using mmap

use super::{page_align, StackRegion};
use lazyreq_core::constants::GUARD_SIZE;
use lazyreq_core::error::{MemoryError, SchedResult};
use lazyreq_core::id::SlotId;
use lazyreq_core::kerror;

impl StackRegion {
    /// Reserve address space for `max_slots` stacks of `stack_size` bytes
    ///
    /// Memory is reserved with PROT_NONE (no access) and MAP_NORESERVE, so
    /// an unused slot costs address space only.
    pub fn reserve(max_slots: usize, stack_size: usize) -> SchedResult<Self> {
        let stack_size = page_align(stack_size);
        let slot_size = stack_size + GUARD_SIZE;
        let total_size = max_slots
            .checked_mul(slot_size)
            .ok_or(MemoryError::TooManySlots)?;

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                total_size,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };

        if base == libc::MAP_FAILED {
            return Err(MemoryError::AllocationFailed.into());
        }

        Ok(Self {
            base: base as *mut u8,
            total_size,
            slot_size,
            stack_size,
            max_slots,
        })
    }

    /// Make a slot's stack readable/writable
    ///
    /// Only needed the first time a slot is handed out; released slots
    /// keep their protection. The guard page stays PROT_NONE so a stack
    /// overflow raises SIGSEGV.
    pub fn activate_slot(&self, slot: SlotId) -> SchedResult<()> {
        if slot.as_usize() >= self.max_slots {
            return Err(MemoryError::InvalidSlot.into());
        }

        let ret = unsafe {
            libc::mprotect(
                self.stack_bottom(slot) as *mut libc::c_void,
                self.stack_size,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        };
        if ret != 0 {
            return Err(MemoryError::ProtectionFailed.into());
        }

        Ok(())
    }

    /// Release a slot's physical pages
    ///
    /// Called when a fiber finishes and its slot is being recycled.
    pub fn deactivate_slot(&self, slot: SlotId) -> SchedResult<()> {
        if slot.as_usize() >= self.max_slots {
            return Err(MemoryError::InvalidSlot.into());
        }

        let ret = unsafe {
            libc::madvise(
                self.stack_bottom(slot) as *mut libc::c_void,
                self.stack_size,
                libc::MADV_DONTNEED,
            )
        };
        if ret != 0 {
            return Err(MemoryError::AdviseFailed.into());
        }

        Ok(())
    }
}

impl Drop for StackRegion {
    fn drop(&mut self) {
        if self.base.is_null() {
            return;
        }
        let ret = unsafe { libc::munmap(self.base as *mut libc::c_void, self.total_size) };
        if ret != 0 {
            kerror!("munmap of stack region failed ({} bytes)", self.total_size);
        }
        self.base = std::ptr::null_mut();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazyreq_core::constants::PAGE_SIZE;

    #[test]
    fn test_reserve_layout() {
        let region = StackRegion::reserve(4, 64 * 1024 + 1).unwrap();
        assert_eq!(region.stack_size(), 64 * 1024 + PAGE_SIZE);
        assert_eq!(region.slot_size(), region.stack_size() + GUARD_SIZE);
        assert_eq!(region.total_size(), 4 * region.slot_size());

        let slot = SlotId::new(2);
        assert_eq!(
            region.stack_top(slot) as usize - region.stack_bottom(slot) as usize,
            region.stack_size()
        );
        assert_eq!(region.stack_top(SlotId::new(1)), region.slot_base(slot));
    }

    #[test]
    fn test_activate_write_deactivate() {
        let region = StackRegion::reserve(2, 64 * 1024).unwrap();
        let slot = SlotId::new(1);
        region.activate_slot(slot).unwrap();

        unsafe {
            let top = region.stack_top(slot).sub(8) as *mut u64;
            top.write(0xdead_beef);
            assert_eq!(top.read(), 0xdead_beef);
            let bottom = region.stack_bottom(slot) as *mut u64;
            bottom.write(7);
        }

        region.deactivate_slot(slot).unwrap();

        // DONTNEED on private anonymous memory reads back as zero
        unsafe {
            let top = region.stack_top(slot).sub(8) as *const u64;
            assert_eq!(top.read(), 0);
        }
    }

    #[test]
    fn test_invalid_slot() {
        let region = StackRegion::reserve(1, 64 * 1024).unwrap();
        assert!(region.activate_slot(SlotId::new(1)).is_err());
        assert!(region.deactivate_slot(SlotId::new(5)).is_err());
    }
}

//! # Packet Ring Implementation
//!
//! This module provides the fixed-slot circular buffers used for DAP request
//! and response packets. A ring is split into two halves with different
//! access rules:
//!
//! 1. **[`RingState`]**: cursors, sticky flags and per-slot lengths. Plain
//!    data with no internal locking; the endpoint driver keeps both rings'
//!    state behind a single mutex so every access needs the guard.
//!
//! 2. **[`PacketSlots`]**: the payload bytes. The USB controller reads and
//!    writes these directly, so they hand out raw slot pointers for transfer
//!    submission. Ownership of a slot is a protocol convention: the producer
//!    owns the slot at the write cursor, the consumer owns the slots between
//!    the read and write cursors.
//!
//! ## Cursor Layout
//!
//! ```text
//! ┌────────┬────────┬────────┬────────┐
//! │ slot 0 │ slot 1 │ slot 2 │ slot 3 │   N = 4, 3 usable
//! └────────┴────────┴────────┴────────┘
//!      ▲                 ▲
//!   rptr % N          wptr % N
//!   (oldest unread)   (next to fill)
//! ```
//!
//! Cursors only ever grow (with wrapping), the slot index is `cursor % N`.
//! One slot is always held back so that `wptr == rptr` means empty and
//! `(wptr + 1) % N == rptr % N` means full.

use core::cell::UnsafeCell;
use core::fmt;
use core::ptr::NonNull;

use serde::{Deserialize, Serialize};

/// Errors specific to ring operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufferError {
    /// Attempted to advance the write cursor of a full ring
    Overflow,
    /// Attempted to advance the read cursor of an empty ring
    Underflow,
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::Overflow => f.write_str("ring buffer overflow"),
            BufferError::Underflow => f.write_str("ring buffer underflow"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for BufferError {}

/// Cursor and flag state of one packet ring
///
/// `N` must be a power of two so that wrapping the 32-bit cursors keeps
/// `cursor % N` continuous.
#[derive(Debug, Clone)]
pub struct RingState<const N: usize> {
    /// Write cursor (next slot the producer fills)
    wptr: u32,
    /// Read cursor (oldest slot the consumer has not released)
    rptr: u32,
    /// Producer found the ring full and skipped a resubmission
    was_full: bool,
    /// Consumer found nothing more to send
    was_empty: bool,
    /// Valid bytes per slot (response ring only)
    data_len: [u16; N],
}

impl<const N: usize> RingState<N> {
    const MASK: u32 = {
        assert!(N >= 2 && N.is_power_of_two(), "ring size must be a power of two");
        assert!(N <= u32::MAX as usize);
        (N - 1) as u32
    };

    /// Create a ring in its interface-open state
    pub const fn new() -> Self {
        Self {
            wptr: 0,
            rptr: 0,
            was_full: false,
            was_empty: true,
            data_len: [0; N],
        }
    }

    /// Number of usable slots (one is held back)
    #[inline]
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Return the ring to its interface-open state
    ///
    /// Cursors go back to zero, `was_full` is cleared and `was_empty` set.
    pub fn reset(&mut self) {
        self.wptr = 0;
        self.rptr = 0;
        self.was_full = false;
        self.was_empty = true;
    }

    /// Zero every field, as done at teardown
    pub fn clear(&mut self) {
        self.wptr = 0;
        self.rptr = 0;
        self.was_full = false;
        self.was_empty = false;
        self.data_len = [0; N];
    }

    /// Check if the ring has no free slot left
    #[inline]
    pub fn is_full(&self) -> bool {
        (self.wptr.wrapping_add(1) & Self::MASK) == (self.rptr & Self::MASK)
    }

    /// Check if the ring holds no unread slot
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.wptr == self.rptr
    }

    /// Number of slots between the read and write cursors
    #[inline]
    pub fn len(&self) -> usize {
        self.wptr.wrapping_sub(self.rptr) as usize
    }

    /// Raw write cursor
    #[inline]
    pub fn write_cursor(&self) -> u32 {
        self.wptr
    }

    /// Raw read cursor
    #[inline]
    pub fn read_cursor(&self) -> u32 {
        self.rptr
    }

    /// Slot index for an arbitrary cursor value
    #[inline]
    pub fn index_of(cursor: u32) -> usize {
        (cursor & Self::MASK) as usize
    }

    /// Slot index of the write cursor
    #[inline]
    pub fn write_index(&self) -> usize {
        Self::index_of(self.wptr)
    }

    /// Slot index of the read cursor
    #[inline]
    pub fn read_index(&self) -> usize {
        Self::index_of(self.rptr)
    }

    /// Advance the write cursor by one slot
    ///
    /// Refuses to move onto the held-back slot, so occupancy stays within
    /// `0..=N-1`. Returns the new cursor.
    pub fn advance_write(&mut self) -> Result<u32, BufferError> {
        if self.is_full() {
            return Err(BufferError::Overflow);
        }
        self.wptr = self.wptr.wrapping_add(1);
        Ok(self.wptr)
    }

    /// Advance the read cursor by one slot, releasing it to the producer
    pub fn advance_read(&mut self) -> Result<u32, BufferError> {
        if self.is_empty() {
            return Err(BufferError::Underflow);
        }
        self.rptr = self.rptr.wrapping_add(1);
        Ok(self.rptr)
    }

    #[inline]
    pub fn was_full(&self) -> bool {
        self.was_full
    }

    #[inline]
    pub fn set_was_full(&mut self, was_full: bool) {
        self.was_full = was_full;
    }

    #[inline]
    pub fn was_empty(&self) -> bool {
        self.was_empty
    }

    #[inline]
    pub fn set_was_empty(&mut self, was_empty: bool) {
        self.was_empty = was_empty;
    }

    /// Recorded length of a slot
    #[inline]
    pub fn slot_len(&self, index: usize) -> u16 {
        self.data_len[index & Self::MASK as usize]
    }

    /// Record the valid length of a slot
    #[inline]
    pub fn set_slot_len(&mut self, index: usize, len: u16) {
        self.data_len[index & Self::MASK as usize] = len;
    }

    /// Copy out the cursors and flags for diagnostics
    pub fn snapshot(&self) -> RingSnapshot {
        RingSnapshot {
            write_cursor: self.wptr,
            read_cursor: self.rptr,
            was_full: self.was_full,
            was_empty: self.was_empty,
        }
    }
}

impl<const N: usize> Default for RingState<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of a ring's cursors and flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RingSnapshot {
    pub write_cursor: u32,
    pub read_cursor: u32,
    pub was_full: bool,
    pub was_empty: bool,
}

impl RingSnapshot {
    /// Number of unread slots at the time of the snapshot
    pub fn len(&self) -> usize {
        self.write_cursor.wrapping_sub(self.read_cursor) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.write_cursor == self.read_cursor
    }
}

/// Payload storage for one packet ring
///
/// Each slot sits in its own [`UnsafeCell`] because the USB controller and
/// the command worker touch different slots concurrently. No locking is done
/// here; callers follow the single-writer-per-slot rule described in the
/// module docs.
pub struct PacketSlots<const N: usize, const SIZE: usize> {
    slots: [UnsafeCell<[u8; SIZE]>; N],
}

// SAFETY: slots are only reached through raw pointers or the unsafe
// accessors below, whose callers guarantee one writer per slot at a time.
unsafe impl<const N: usize, const SIZE: usize> Sync for PacketSlots<N, SIZE> {}

impl<const N: usize, const SIZE: usize> PacketSlots<N, SIZE> {
    /// Create zero-filled slot storage
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| UnsafeCell::new([0u8; SIZE])),
        }
    }

    /// Size in bytes of one slot
    #[inline]
    pub const fn packet_size(&self) -> usize {
        SIZE
    }

    /// Raw pointer to the first byte of a slot, for transfer submission
    ///
    /// The pointee is `SIZE` bytes long and stays valid for the lifetime of
    /// `self`.
    pub fn slot_ptr(&self, index: usize) -> NonNull<u8> {
        let cell = &self.slots[index % N];
        // SAFETY: UnsafeCell::get never returns null.
        unsafe { NonNull::new_unchecked(cell.get().cast::<u8>()) }
    }

    /// Shared view of a slot
    ///
    /// # Safety
    ///
    /// No one may write the slot while the returned reference is alive.
    pub unsafe fn slot(&self, index: usize) -> &[u8; SIZE] {
        &*self.slots[index % N].get()
    }

    /// Exclusive view of a slot
    ///
    /// # Safety
    ///
    /// The caller must be the only party reading or writing the slot while
    /// the returned reference is alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slot_mut(&self, index: usize) -> &mut [u8; SIZE] {
        &mut *self.slots[index % N].get()
    }

    /// Zero every slot
    ///
    /// # Safety
    ///
    /// No transfer may be in flight and no slot reference may be alive.
    pub unsafe fn zero(&self) {
        for cell in &self.slots {
            core::ptr::write_bytes(cell.get(), 0, 1);
        }
    }
}

impl<const N: usize, const SIZE: usize> Default for PacketSlots<N, SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

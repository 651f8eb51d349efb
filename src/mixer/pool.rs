// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::cell::UnsafeCell;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

const FREE: u8 = 0;
const FILLING: u8 = 1;
const DRAINING: u8 = 2;
const RELEASED: u8 = 3;

/// Ownership state of one output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Owned by nobody; the producer may claim it.
    Free,
    /// Owned by the producer while a tick writes it.
    Filling,
    /// Owned by the consumer until its `Drain` is dropped.
    Draining,
    /// Storage freed by `deinit`.
    Released,
}

impl From<u8> for BufferState {
    fn from(value: u8) -> Self {
        match value {
            FREE => BufferState::Free,
            FILLING => BufferState::Filling,
            DRAINING => BufferState::Draining,
            _ => BufferState::Released,
        }
    }
}

struct Slot {
    state: AtomicU8,
    data: UnsafeCell<Box<[u8]>>,
}

/// Two fixed-size byte buffers exchanged between the producer (mixer) and the
/// consumer (sink).
///
/// A buffer's bytes are only touched by whoever moved its state word out of
/// `Free`: the producer through a `Fill`, the consumer through a `Drain`.
pub struct OutputBufferPool {
    slots: [Slot; 2],
    buffer_size: usize,
    released: AtomicBool,
}

// SAFETY: the bytes in each slot are only accessed through a Fill (exclusive,
// state FILLING) or a Drain (shared, state DRAINING). Both are created by a
// successful transition of the slot's state word, so at most one side
// accesses a slot at any time.
unsafe impl Sync for OutputBufferPool {}

impl OutputBufferPool {
    /// Allocates both buffers.
    pub fn new(buffer_size: usize) -> OutputBufferPool {
        let slot = || Slot {
            state: AtomicU8::new(FREE),
            data: UnsafeCell::new(vec![0; buffer_size].into_boxed_slice()),
        };
        OutputBufferPool {
            slots: [slot(), slot()],
            buffer_size,
            released: AtomicBool::new(false),
        }
    }

    /// Byte size of each buffer.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Returns the current state of buffer `index` (0 or 1).
    pub fn state(&self, index: usize) -> BufferState {
        self.slots[index].state.load(Ordering::Acquire).into()
    }

    /// Claims buffer `index` for writing. Returns None if the consumer still
    /// holds it or the pool has been released.
    pub fn begin_fill(&self, index: usize) -> Option<Fill<'_>> {
        self.slots[index]
            .state
            .compare_exchange(FREE, FILLING, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Fill { pool: self, index })
    }

    /// Frees every buffer the consumer does not hold. A held buffer is freed
    /// when its `Drain` is dropped. Idempotent.
    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
        for index in 0..self.slots.len() {
            self.free_slot(index);
        }
    }

    /// True once `release` has been called.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn free_slot(&self, index: usize) {
        let slot = &self.slots[index];
        if slot
            .state
            .compare_exchange(FREE, RELEASED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            // SAFETY: the RELEASED transition above makes this the only access.
            unsafe {
                *slot.data.get() = Box::default();
            }
        }
    }

    /// Hands buffer `index` back to the producer.
    fn give_back(&self, index: usize) {
        self.slots[index].state.store(FREE, Ordering::SeqCst);
        if self.released.load(Ordering::SeqCst) {
            self.free_slot(index);
        }
    }
}

/// Exclusive write access to a buffer claimed by the producer.
///
/// Dropping a Fill without publishing it returns the buffer to `Free`.
pub struct Fill<'a> {
    pool: &'a OutputBufferPool,
    index: usize,
}

impl<'a> Fill<'a> {
    /// Index of the claimed buffer.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The buffer's bytes.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: state is FILLING and this Fill is the only one for the slot.
        unsafe { &mut **self.pool.slots[self.index].data.get() }
    }

    /// Hands the written buffer to the consumer.
    pub fn publish(self) -> Drain<'a> {
        let this = ManuallyDrop::new(self);
        this.pool.slots[this.index]
            .state
            .store(DRAINING, Ordering::Release);
        Drain {
            pool: this.pool,
            index: this.index,
        }
    }
}

impl Drop for Fill<'_> {
    fn drop(&mut self) {
        self.pool.give_back(self.index);
    }
}

/// Read access to a buffer the consumer is draining. Dropping it (or calling
/// `release`) returns the buffer to the producer.
pub struct Drain<'a> {
    pool: &'a OutputBufferPool,
    index: usize,
}

impl Drain<'_> {
    /// Index of the drained buffer.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the buffer to the producer.
    pub fn release(self) {}
}

impl Deref for Drain<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: state is DRAINING; the producer cannot claim the slot until
        // this Drain is dropped.
        unsafe { &**self.pool.slots[self.index].data.get() }
    }
}

impl Drop for Drain<'_> {
    fn drop(&mut self) {
        self.pool.give_back(self.index);
    }
}

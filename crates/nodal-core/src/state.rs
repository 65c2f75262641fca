//! Per-instance state history.
//!
//! Every quantity a device must remember between iterations or time points
//! lives in a fixed slot of its [`StateBlock`]. Slots are named by a
//! device-specific enum implementing [`StateSlot`], so the layout of a device
//! type is fixed when the enum is written and identical for all its instances.
//!
//! `state0` is the present iteration/time point, `state1` the last accepted
//! time point, and higher ages hold older accepted points for multi-step
//! integration.

use crate::integration::MAX_ORDER;

/// A named slot of a device's state record.
pub trait StateSlot: Copy {
    /// Number of slots the device type occupies.
    const COUNT: usize;

    /// Offset of this slot inside the block.
    fn offset(self) -> usize;
}

/// Location of one instance's slots inside the [`StateStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateBlock {
    base: usize,
    len: usize,
}

impl StateBlock {
    /// Absolute index of `slot` in the store.
    #[inline]
    pub fn at<S: StateSlot>(self, slot: S) -> usize {
        debug_assert!(slot.offset() < self.len);
        self.base + slot.offset()
    }

    /// Number of slots in the block.
    pub fn len(self) -> usize {
        self.len
    }

    /// True for a block with no slots.
    pub fn is_empty(self) -> bool {
        self.len == 0
    }
}

/// History depth: enough for the highest Gear order plus the truncation estimate.
pub const HISTORY_DEPTH: usize = MAX_ORDER + 2;

/// Flat storage for every instance's state, one buffer per history age.
#[derive(Debug, Clone)]
pub struct StateStore {
    width: usize,
    history: Vec<Vec<f64>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            width: 0,
            history: vec![Vec::new(); HISTORY_DEPTH],
        }
    }

    /// Forget every allocation. Blocks handed out earlier become invalid.
    pub fn reset(&mut self) {
        self.width = 0;
        for buf in &mut self.history {
            buf.clear();
        }
    }

    /// Reserve `len` slots for one instance.
    pub fn allocate(&mut self, len: usize) -> StateBlock {
        let block = StateBlock {
            base: self.width,
            len,
        };
        self.width += len;
        for buf in &mut self.history {
            buf.resize(self.width, 0.0);
        }
        block
    }

    /// Total number of slots.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Value of absolute slot `index` at history `age` (0 = present).
    #[inline]
    pub fn get(&self, age: usize, index: usize) -> f64 {
        self.history[age][index]
    }

    /// Set absolute slot `index` at history `age`.
    #[inline]
    pub fn set(&mut self, age: usize, index: usize, value: f64) {
        self.history[age][index] = value;
    }

    /// Present value of a typed slot.
    #[inline]
    pub fn now<S: StateSlot>(&self, block: StateBlock, slot: S) -> f64 {
        self.history[0][block.at(slot)]
    }

    /// Last accepted value of a typed slot.
    #[inline]
    pub fn prev<S: StateSlot>(&self, block: StateBlock, slot: S) -> f64 {
        self.history[1][block.at(slot)]
    }

    /// Value of a typed slot `age` accepted points ago.
    #[inline]
    pub fn aged<S: StateSlot>(&self, age: usize, block: StateBlock, slot: S) -> f64 {
        self.history[age][block.at(slot)]
    }

    /// Write the present value of a typed slot.
    #[inline]
    pub fn set_now<S: StateSlot>(&mut self, block: StateBlock, slot: S, value: f64) {
        self.history[0][block.at(slot)] = value;
    }

    /// Write the last accepted value of a typed slot.
    #[inline]
    pub fn set_prev<S: StateSlot>(&mut self, block: StateBlock, slot: S, value: f64) {
        self.history[1][block.at(slot)] = value;
    }

    /// Buffer of one history age.
    pub fn buffer(&self, age: usize) -> &[f64] {
        &self.history[age]
    }

    /// Age the history after a time point is accepted.
    ///
    /// The oldest buffer is recycled as the new `state0`, which starts as a
    /// copy of the just-accepted values.
    pub fn rotate(&mut self) {
        self.history.rotate_right(1);
        let (head, tail) = self.history.split_at_mut(1);
        head[0].copy_from_slice(&tail[0]);
    }

    /// Copy `state0` into every older age.
    ///
    /// Used once the operating point is known so the first transient step sees
    /// a flat history.
    pub fn seed_history(&mut self) {
        let (head, tail) = self.history.split_at_mut(1);
        for buf in tail {
            buf.copy_from_slice(&head[0]);
        }
    }

    /// Restore `state0` from the last accepted point (rejected step).
    pub fn restore_present(&mut self) {
        let (head, tail) = self.history.split_at_mut(1);
        head[0].copy_from_slice(&tail[0]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy)]
    enum Slot {
        V,
        Q,
        I,
    }

    impl StateSlot for Slot {
        const COUNT: usize = 3;
        fn offset(self) -> usize {
            self as usize
        }
    }

    #[test]
    fn test_allocate_blocks() {
        let mut store = StateStore::new();
        let a = store.allocate(Slot::COUNT);
        let b = store.allocate(Slot::COUNT);
        assert_eq!(store.width(), 6);
        assert_eq!(a.at(Slot::V), 0);
        assert_eq!(b.at(Slot::V), 3);
        assert_eq!(b.at(Slot::I), 5);
    }

    #[test]
    fn test_rotate_keeps_present_as_copy() {
        let mut store = StateStore::new();
        let a = store.allocate(Slot::COUNT);
        store.set_now(a, Slot::Q, 1.0);
        store.rotate();
        assert_eq!(store.prev(a, Slot::Q), 1.0);
        assert_eq!(store.now(a, Slot::Q), 1.0);
        store.set_now(a, Slot::Q, 2.0);
        store.rotate();
        assert_eq!(store.aged(2, a, Slot::Q), 1.0);
        assert_eq!(store.prev(a, Slot::Q), 2.0);
    }

    #[test]
    fn test_seed_and_restore() {
        let mut store = StateStore::new();
        let a = store.allocate(Slot::COUNT);
        store.set_now(a, Slot::V, 0.7);
        store.seed_history();
        for age in 0..HISTORY_DEPTH {
            assert_eq!(store.aged(age, a, Slot::V), 0.7);
        }
        store.set_now(a, Slot::V, 5.0);
        store.restore_present();
        assert_eq!(store.now(a, Slot::V), 0.7);
    }
}

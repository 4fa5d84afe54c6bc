//! Wrapping cursors over a ring of channel slots.

/// Cursor over `num_buffers` slots.
///
/// The raw value wraps at `2 * num_buffers`. That keeps "empty" (equal cursors) distinct
/// from "full" (cursors `num_buffers` apart) while the slot index stays a plain reduction
/// of the raw value. The same raw value is what gets published to 32-bit semaphores, so
/// every party that holds a copy maps it to the same slot for any slot count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelBufferPointer {
    ptr: u32,
    num_buffers: u32,
}

impl ChannelBufferPointer {
    /// Cursor at zero.
    #[must_use]
    pub fn new(num_buffers: usize) -> Self {
        Self::from_raw(0, num_buffers)
    }

    /// Cursor resumed from a published raw value.
    #[must_use]
    pub fn from_raw(raw: u32, num_buffers: usize) -> Self {
        assert!(
            (1..=(u32::MAX / 2) as usize).contains(&num_buffers),
            "slot count out of range"
        );
        let num_buffers = num_buffers as u32;
        Self {
            ptr: raw % (2 * num_buffers),
            num_buffers,
        }
    }

    const fn span(&self) -> u32 {
        2 * self.num_buffers
    }

    /// Raw cursor value, in `0..2 * num_buffers`.
    #[must_use]
    pub const fn get_ptr(&self) -> u32 {
        self.ptr
    }

    /// Cursor value as published to 32-bit semaphores.
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.ptr
    }

    /// Wrap boundary to hand to a NoC atomic that advances a published copy of this cursor.
    #[must_use]
    pub const fn wrap_boundary(&self) -> u32 {
        self.span() - 1
    }

    /// Slot count.
    #[must_use]
    pub const fn num_buffers(&self) -> usize {
        self.num_buffers as usize
    }

    /// Advance by one slot.
    pub fn increment(&mut self) {
        self.increment_n(1);
    }

    /// Advance by `n` slots.
    pub fn increment_n(&mut self, n: u64) {
        let span = u64::from(self.span());
        self.ptr = ((u64::from(self.ptr) + n % span) % span) as u32;
    }

    /// Slot index the cursor currently points at.
    #[must_use]
    pub const fn get_buffer_index(&self) -> usize {
        (self.ptr % self.num_buffers) as usize
    }

    /// How far this cursor trails `other`.
    ///
    /// Only meaningful while the two are at most `num_buffers` apart.
    #[must_use]
    pub fn distance_behind(&self, other: &Self) -> u64 {
        debug_assert_eq!(self.num_buffers, other.num_buffers, "cursors over different rings");
        let span = u64::from(self.span());
        (u64::from(other.ptr) + span - u64::from(self.ptr)) % span
    }

    /// Whether this cursor has reached `other`.
    #[must_use]
    pub const fn is_caught_up_to(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

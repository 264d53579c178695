use bytemuck::Zeroable;

use crate::util::Address;

/// A `[cursor, limit)` pair owned by one mutator thread. The collector refills it in the
/// slow path; the fast path only ever moves `cursor` forward.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Zeroable)]
pub struct BumpPointer {
    pub cursor: Address,
    pub limit: Address,
}

// Compiled allocation sequences load the cursor and the limit as two adjacent words.
static_assertions::assert_eq_size!(BumpPointer, [usize; 2]);
static_assertions::const_assert_eq!(
    std::mem::align_of::<BumpPointer>(),
    std::mem::align_of::<usize>()
);

impl BumpPointer {
    pub const fn new(start: Address, end: Address) -> Self {
        BumpPointer {
            cursor: start,
            limit: end,
        }
    }

    pub fn reset(&mut self, start: Address, end: Address) {
        self.cursor = start;
        self.limit = end;
    }

    /// Bump `size` bytes off the buffer. `size` must already be aligned by the caller.
    /// Returns `None` and leaves the cursor alone if the buffer cannot hold the request.
    #[inline(always)]
    pub fn try_alloc(&mut self, size: usize) -> Option<Address> {
        let result = self.cursor;
        let new_cursor = result.checked_add(size)?;
        if new_cursor <= self.limit {
            self.cursor = new_cursor;
            Some(result)
        } else {
            None
        }
    }

    pub fn remaining(&self) -> usize {
        if self.cursor <= self.limit {
            self.limit - self.cursor
        } else {
            0
        }
    }
}

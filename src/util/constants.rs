/// log2 of the number of bits in a byte
pub const LOG_BITS_IN_BYTE: u8 = 3;
/// The number of bits in a byte
pub const BITS_IN_BYTE: usize = 1 << LOG_BITS_IN_BYTE;

/// log2 of the number of bytes in a gigabyte
pub const LOG_BYTES_IN_GBYTE: u8 = 30;
/// The number of bytes in a gigabyte
pub const BYTES_IN_GBYTE: usize = 1 << LOG_BYTES_IN_GBYTE;

/// log2 of the number of bytes in a kilobyte
pub const LOG_BYTES_IN_KBYTE: u8 = 10;
/// The number of bytes in a kilobyte
pub const BYTES_IN_KBYTE: usize = 1 << LOG_BYTES_IN_KBYTE;

#[cfg(target_pointer_width = "32")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 2;
#[cfg(target_pointer_width = "64")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 3;
/// The number of bytes in an address
pub const BYTES_IN_ADDRESS: usize = 1 << LOG_BYTES_IN_ADDRESS;

/// log2 of the number of bytes in a word
pub const LOG_BYTES_IN_WORD: u8 = LOG_BYTES_IN_ADDRESS;
/// The number of bytes in a word
pub const BYTES_IN_WORD: usize = 1 << LOG_BYTES_IN_WORD;

/// log2 of the number of bytes in a page
pub const LOG_BYTES_IN_PAGE: u8 = 12;
/// The number of bytes in a page
pub const BYTES_IN_PAGE: usize = 1 << LOG_BYTES_IN_PAGE;

/// The allocation granularity of the managed heap (`HeapWordSize` in the VM).
pub const HEAP_WORD_SIZE: usize = BYTES_IN_WORD;

// Reference slot widths in the managed heap.

/// log2 of the size of a full-width reference slot.
pub const LOG_BYTES_IN_WIDE_SLOT: u8 = LOG_BYTES_IN_ADDRESS;
/// log2 of the size of a compressed (narrow) reference slot.
pub const LOG_BYTES_IN_NARROW_SLOT: u8 = 2;

/// The side metadata value for a slot that has not been recorded in this GC cycle.
pub const UNLOGGED_VALUE: u8 = 1;
/// The side metadata value for a slot that has been recorded.
pub const LOGGED_VALUE: u8 = 0;

/// Objects no smaller than this get the large bump pointer of an immix allocator
/// when the regular bump pointer is exhausted.
pub const DEFAULT_LARGE_BUMP_THRESHOLD: usize = 256;

/// Heaps that end below this address can use zero-based compressed references without a shift.
pub const UNSCALED_NARROW_OOP_HEAP_END: usize = 4 << LOG_BYTES_IN_GBYTE;
/// Heaps that end below this address can use zero-based compressed references.
pub const ZERO_BASED_NARROW_OOP_HEAP_END: usize = 32 << LOG_BYTES_IN_GBYTE;
/// log2 of the object alignment used to scale compressed references.
pub const LOG_NARROW_OOP_SHIFT: usize = 3;

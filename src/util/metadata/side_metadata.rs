use crate::util::constants::*;
use crate::util::Address;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Describes one bit of side metadata per reference slot: the unlog bit consulted by every
/// write barrier. The table is contiguous and biased so that the metadata byte for a slot
/// is `base + (slot >> (log_bytes_in_region + 3))` and the bit within it is
/// `(slot >> log_bytes_in_region) & 7`.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct SideMetadataSpec {
    /// Biased base of the table, as published by the collector.
    pub base: Address,
    /// log2 of the slot size covered by one bit: 2 for compressed slots, 3 for full-width.
    pub log_bytes_in_region: u8,
}

impl fmt::Debug for SideMetadataSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SideMetadataSpec {{ base: {}, log_bytes_in_region: {} }}",
            self.base, self.log_bytes_in_region
        )
    }
}

impl SideMetadataSpec {
    /// The unlog bit spec for the given slot width.
    pub const fn unlog_bits(base: Address, compressed: bool) -> Self {
        Self {
            base,
            log_bytes_in_region: if compressed {
                LOG_BYTES_IN_NARROW_SLOT
            } else {
                LOG_BYTES_IN_WIDE_SLOT
            },
        }
    }

    /// Number of low address bits dropped to index the metadata byte (5 compressed, 6 full).
    pub const fn log_bytes_per_meta_byte(&self) -> u8 {
        self.log_bytes_in_region + LOG_BITS_IN_BYTE
    }

    /// Address of the metadata byte covering `data_addr`.
    pub fn address_to_meta_address(&self, data_addr: Address) -> Address {
        self.base
            .wrapping_add(data_addr >> self.log_bytes_per_meta_byte() as usize)
    }

    /// Bit position within the metadata byte covering `data_addr`.
    pub fn meta_byte_lshift(&self, data_addr: Address) -> u8 {
        ((data_addr >> self.log_bytes_in_region as usize) & (BITS_IN_BYTE - 1)) as u8
    }

    /// Racy single-byte load of the metadata byte. A stale value only costs an extra or a
    /// missed slow call that the collector tolerates.
    pub fn load_byte(&self, data_addr: Address) -> u8 {
        let meta_addr = self.address_to_meta_address(data_addr);
        unsafe { meta_addr.atomic_load::<AtomicU8>(Ordering::Relaxed) }
    }

    /// Is the slot still unlogged in this cycle?
    pub fn is_unlogged(&self, slot: Address) -> bool {
        let byte = self.load_byte(slot);
        (byte >> self.meta_byte_lshift(slot)) & 1 == UNLOGGED_VALUE
    }

    /// Mark the slot as unlogged. Used by the collector side (and tests) when a new cycle
    /// starts.
    pub fn mark_as_unlogged(&self, slot: Address) {
        let meta_addr = self.address_to_meta_address(slot);
        let mask = 1u8 << self.meta_byte_lshift(slot);
        unsafe { meta_addr.as_ref::<AtomicU8>() }.fetch_or(mask, Ordering::SeqCst);
    }

    /// Mark the slot as logged. Returns true if this call flipped the bit.
    pub fn mark_as_logged(&self, slot: Address) -> bool {
        let meta_addr = self.address_to_meta_address(slot);
        let mask = 1u8 << self.meta_byte_lshift(slot);
        let old = unsafe { meta_addr.as_ref::<AtomicU8>() }.fetch_and(!mask, Ordering::SeqCst);
        old & mask != 0
    }
}

/// A side table owned by this process, covering the slots in `[start, end)`. Collectors
/// that do not publish their own table, and the tests, use it to back a
/// [`SideMetadataSpec`].
pub struct SideMetadataTable {
    bytes: Box<[AtomicU8]>,
    spec: SideMetadataSpec,
    start: Address,
    end: Address,
}

impl SideMetadataTable {
    /// Allocate a zeroed (all logged) table for the slot range `[start, end)`.
    pub fn new(start: Address, end: Address, compressed: bool) -> Self {
        assert!(start < end, "Empty side metadata range {}..{}", start, end);
        let shift = SideMetadataSpec::unlog_bits(Address::ZERO, compressed)
            .log_bytes_per_meta_byte() as usize;
        let first = start >> shift;
        let last = (end - 1usize) >> shift;
        let bytes: Box<[AtomicU8]> = (first..=last).map(|_| AtomicU8::new(0)).collect();
        let table_start = Address::from_ptr(bytes.as_ptr());
        let base = unsafe { Address::from_usize(table_start.as_usize().wrapping_sub(first)) };
        trace!(
            "Side metadata table for {}..{}: {} bytes, biased base {}",
            start,
            end,
            bytes.len(),
            base
        );
        Self {
            bytes,
            spec: SideMetadataSpec::unlog_bits(base, compressed),
            start,
            end,
        }
    }

    pub fn spec(&self) -> SideMetadataSpec {
        self.spec
    }

    pub fn covers(&self, slot: Address) -> bool {
        self.start <= slot && slot < self.end
    }

    /// Set every bit in the table to `value`.
    pub fn fill(&self, value: u8) {
        let byte = if value == UNLOGGED_VALUE { 0xff } else { 0 };
        for b in self.bytes.iter() {
            b.store(byte, Ordering::SeqCst);
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::FakeHeap;

    fn check_set_consistency(compressed: bool) {
        let heap = FakeHeap::new(64 * 1024);
        let table = SideMetadataTable::new(heap.start(), heap.end(), compressed);
        let spec = table.spec();
        let slot_size = if compressed { 4 } else { 8 };

        let mut slot = heap.start();
        while slot < heap.end() {
            assert!(!spec.is_unlogged(slot));
            spec.mark_as_unlogged(slot);
            assert!(spec.is_unlogged(slot));
            // neighbours in the same byte are untouched
            if slot + slot_size < heap.end() {
                assert!(!spec.is_unlogged(slot + slot_size));
            }
            assert!(spec.mark_as_logged(slot));
            assert!(!spec.mark_as_logged(slot));
            assert!(!spec.is_unlogged(slot));
            slot += slot_size * 7;
        }
    }

    #[test]
    fn set_then_check_full_width() {
        check_set_consistency(false);
    }

    #[test]
    fn set_then_check_compressed() {
        check_set_consistency(true);
    }

    #[test]
    fn byte_and_bit_indexing() {
        let base = unsafe { Address::from_usize(0x10_0000) };
        let slot = unsafe { Address::from_usize(0x1238) };

        let full = SideMetadataSpec::unlog_bits(base, false);
        assert_eq!(full.address_to_meta_address(slot), base + (0x1238usize >> 6));
        assert_eq!(full.meta_byte_lshift(slot) as usize, (0x1238 >> 3) & 7);

        let narrow = SideMetadataSpec::unlog_bits(base, true);
        assert_eq!(narrow.address_to_meta_address(slot), base + (0x1238usize >> 5));
        assert_eq!(narrow.meta_byte_lshift(slot) as usize, (0x1238 >> 2) & 7);
    }

    #[test]
    fn one_byte_covers_eight_slots() {
        let heap = FakeHeap::new(4096);
        let table = SideMetadataTable::new(heap.start(), heap.end(), false);
        assert_eq!(table.len(), 4096 / 64 + usize::from(!heap.start().is_aligned_to(64)));
        table.fill(UNLOGGED_VALUE);
        assert!(table.spec().is_unlogged(heap.start()));
        table.fill(LOGGED_VALUE);
        assert!(!table.spec().is_unlogged(heap.start()));
    }
}

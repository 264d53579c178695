use crate::util::{Address, ObjectReference};
use std::sync::atomic::{AtomicUsize, Ordering};

/// The forwarding state lives in the top byte of an object's header word. A copying
/// collector sets both bits once the new copy is installed; the remaining 56 bits then hold
/// the address of the copy.
const FORWARDING_SHIFT: usize = 56;
const FORWARDED: usize = 0b11;
const FORWARDING_MASK: usize = FORWARDED << FORWARDING_SHIFT;
const FORWARDING_POINTER_MASK: usize = (1 << FORWARDING_SHIFT) - 1;

fn header_word(object: ObjectReference) -> usize {
    unsafe {
        object
            .to_raw_address()
            .atomic_load::<AtomicUsize>(Ordering::Relaxed)
    }
}

/// The forwarding bits of the object (0 when it has not been moved).
pub fn get_forwarding_status(object: ObjectReference) -> u8 {
    ((header_word(object) & FORWARDING_MASK) >> FORWARDING_SHIFT) as u8
}

pub fn is_forwarded(object: ObjectReference) -> bool {
    header_word(object) & FORWARDING_MASK != 0
}

/// Where the object was copied to, or `None` if it has not been forwarded.
pub fn get_forwarded_object(object: ObjectReference) -> Option<ObjectReference> {
    let word = header_word(object);
    if word & FORWARDING_MASK != 0 {
        let target = unsafe { Address::from_usize(word & FORWARDING_POINTER_MASK) };
        Some(ObjectReference::from_raw_address(target))
    } else {
        None
    }
}

/// Install a forwarding pointer in the header of `object`. The collector does this when it
/// copies an object; the runtime only needs it to set up weak-processing tests.
pub fn write_forwarding_pointer(object: ObjectReference, new_object: ObjectReference) {
    debug_assert!(
        new_object.value() & !FORWARDING_POINTER_MASK == 0,
        "Forwarded object {} does not fit in the forwarding pointer",
        new_object
    );
    let word = (FORWARDED << FORWARDING_SHIFT) | new_object.value();
    unsafe {
        object
            .to_raw_address()
            .atomic_store::<AtomicUsize>(word, Ordering::Release)
    }
}

//! Utilities shared by the barriers, the allocation path and the stop-the-world protocol.

/// Address and object reference types.
pub mod address;
/// Allocator records and the bump pointer.
pub mod alloc;
/// Constants used across the crate.
pub mod constants;
/// Alignment and unit conversions.
pub mod conversions;
/// Logger initialization.
pub mod logger;
/// Side metadata (unlog bits).
pub mod metadata;
/// Forwarding bits in object headers.
pub mod object_forwarding;
/// Opaque pointers for VM threads.
pub mod opaque_pointer;
/// Runtime options.
pub mod options;
#[cfg(any(test, feature = "mock_test"))]
pub mod test_util;

pub use self::address::Address;
pub use self::address::ObjectReference;
pub use self::opaque_pointer::*;

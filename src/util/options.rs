use crate::util::constants::DEFAULT_LARGE_BUMP_THRESHOLD;
use std::default::Default;
use strum_macros::EnumString;

/// What a reference-load barrier does once it decides the loaded value must be reported.
#[derive(Copy, Clone, EnumString, Debug, PartialEq, Eq)]
pub enum LoadBarrierMode {
    /// Call `load_reference_call(value)`.
    ReferenceCall,
    /// Re-enter the write barrier with `(value, slot, value)`, so the slot is logged
    /// instead of the value being reported directly.
    SlotLogging,
}

/// The default name given to the companion thread.
pub const DEFAULT_COMPANION_THREAD_NAME: &str = "MMTk Companion Thread";

fn always_valid<T>(_: &T) -> bool {
    true
}

/// Declare the runtime options. Each option has a type, a validator and a default value.
/// A value is parsed with `FromStr` from environment variables (`MMTK_<NAME>`) or from
/// the VM command line, and only replaces the current value if it passes validation.
macro_rules! options {
    ($($(#[$outer:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($(#[$outer])* $name: $type[$validator] = $default),*);
    ];
    ($($(#[$outer:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        #[derive(Clone, Debug)]
        pub struct Options {
            $($(#[$outer])* pub $name: $type),*
        }

        impl Options {
            /// Set an option by its snake-case name. Returns false (and keeps the previous
            /// value) if the key is unknown, the value cannot be parsed, or the value is invalid.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    $(stringify!($name) => if let Ok(ref val) = val.parse::<$type>() {
                        let validate_fn = $validator;
                        let is_valid = validate_fn(val);
                        if is_valid {
                            self.$name = val.clone();
                        } else {
                            warn!("Unable to set {}={:?}. Invalid value. The previous value is kept.", s, val);
                        }
                        is_valid
                    } else {
                        warn!("Unable to set {}={:?}. Cannot parse value. The previous value is kept.", s, val);
                        false
                    })*
                    _ => {
                        warn!("Unknown option {}", s);
                        false
                    }
                }
            }

            /// Apply every `MMTK_<NAME>` environment variable that names an option.
            /// Variables with the prefix that match no option are ignored.
            pub fn read_env_var_settings(&mut self) {
                const PREFIX: &str = "MMTK_";
                for (key, val) in std::env::vars() {
                    if let Some(rest_of_key) = key.strip_prefix(PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => { self.set_from_str(lowercase, &val); },)*
                            _ => {}
                        }
                    }
                }
            }
        }

        impl Default for Options {
            fn default() -> Self {
                Options {
                    $($name: $default),*
                }
            }
        }
    ]
}

options! {
    /// Inline the side metadata check in write barriers. When disabled every reference
    /// store calls the pre-write slow entry unconditionally.
    barrier_fastpath:            bool            [always_valid] = true,
    /// The VM stores references as 32-bit compressed values.
    use_compressed_oops:         bool            [always_valid] = false,
    /// Skip array-copy barriers entirely.
    field_barrier_no_arraycopy:  bool            [always_valid] = false,
    /// Emit reference-load barriers for weak, phantom and unknown-strength loads.
    reference_load_barrier:      bool            [always_valid] = true,
    load_barrier_mode:           LoadBarrierMode [always_valid] = LoadBarrierMode::ReferenceCall,
    /// Let the optimizing tier drop the referent guard of an unknown-strength load when
    /// static types prove the base cannot be a reference object.
    unknown_load_short_circuit:  bool            [always_valid] = false,
    /// Always call the collector to allocate.
    disable_fast_alloc:          bool            [always_valid] = false,
    /// Requests above this size may use the large bump pointer of an immix allocator.
    large_bump_threshold:        usize           [always_valid] = DEFAULT_LARGE_BUMP_THRESHOLD,
    companion_thread_name:       String          [|v: &String| !v.is_empty()] = DEFAULT_COMPANION_THREAD_NAME.to_string(),
}

impl Options {
    /// Parse whitespace-separated `name=value` pairs, as passed through the VM command
    /// line. Returns true only if every pair was applied.
    pub fn set_bulk_from_command_line(&mut self, options: &str) -> bool {
        let mut all_applied = true;
        for pair in options.split_ascii_whitespace() {
            let applied = match pair.split_once('=') {
                Some((key, val)) => self.set_from_str(key, val),
                None => {
                    warn!("Option {:?} is not in the form name=value", pair);
                    false
                }
            };
            all_applied &= applied;
        }
        all_applied
    }
}

use log::SetLoggerError;

/// Attempt to install `env_logger` for the runtime, honoring `RUST_LOG` and defaulting to
/// `info`. Does nothing if the "builtin_env_logger" feature is disabled, in which case the
/// embedding process is expected to install its own `log` backend.
pub fn try_init() -> Result<(), SetLoggerError> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            env_logger::try_init_from_env(
                env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
            )
        } else {
            Ok(())
        }
    }
}

/// Install the logger and report the build once. A logger installed earlier by the host
/// is left in place.
pub fn init_once() {
    match try_init() {
        Ok(()) => debug!("Installed the builtin env_logger"),
        Err(e) => debug!("A logger is already installed: {}", e),
    }
    info!("{}", *crate::build_info::RUNTIME_FULL_BUILD_INFO);
}

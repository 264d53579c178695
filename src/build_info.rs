mod raw {
    // The include imports a full list of the constants in built.rs from https://docs.rs/built/latest/built/index.html
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Crate version such as 0.31.0
pub const RUNTIME_PKG_VERSION: &str = raw::PKG_VERSION;

/// Comma separated features enabled for this build
pub const RUNTIME_FEATURES: &str = raw::FEATURES_STR;

lazy_static! {
    /// Git version such as a96e8f991c91a81df51e7975849441f52fdbcdcc, or a96e8f991c91a81df51e7975849441f52fdbcdcc-dirty,
    /// or unknown-git-version if the crate is not built from a git repo.
    pub static ref RUNTIME_GIT_VERSION: &'static str = &RUNTIME_GIT_VERSION_STRING;

    // Owned string
    static ref RUNTIME_GIT_VERSION_STRING: String = match (raw::GIT_COMMIT_HASH, raw::GIT_DIRTY) {
        (Some(hash), Some(dirty)) => format!("{}{}", hash, if dirty { "-dirty" } else { "" }),
        (Some(hash), None) => format!("{}-?", hash),
        _ => "unknown-git-version".to_string(),
    };

    /// Full build information, such as "mmtk-mutator-runtime 0.31.0 (a96e8f9, features: default)".
    pub static ref RUNTIME_FULL_BUILD_INFO: String = format!(
        "mmtk-mutator-runtime {} ({}, features: {})",
        RUNTIME_PKG_VERSION,
        *RUNTIME_GIT_VERSION,
        if RUNTIME_FEATURES.is_empty() { "none" } else { RUNTIME_FEATURES },
    );
}

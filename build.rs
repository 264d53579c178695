// build.rs

fn main() {
    // Expose crate version, enabled features and the git commit to `build_info`.
    built::write_built_file().expect("Failed to acquire build-time information");
}

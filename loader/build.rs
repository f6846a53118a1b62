//! Build script for the loader: wires up the per-architecture linker script.

fn main() {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
    let target = std::env::var("TARGET").unwrap_or_default();

    let linker_script = if target.starts_with("x86_64") {
        "x86_64-simpleboot.ld"
    } else if target.starts_with("aarch64") {
        "aarch64-simpleboot.ld"
    } else {
        return; // native target, nothing to wire
    };

    let script = std::path::Path::new(&manifest_dir)
        .join("targets")
        .join(linker_script);
    println!("cargo:rustc-link-arg-bins=-T{}", script.display());
    println!("cargo:rerun-if-changed={}", script.display());
}

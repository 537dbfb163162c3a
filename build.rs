fn main() {
    // Keep `check-cfg` happy even when we skip `tauri_build::build()` (core-only builds).
    println!("cargo:rustc-check-cfg=cfg(desktop)");
    println!("cargo:rustc-check-cfg=cfg(mobile)");

    // `tauri_build::build()` reads env vars exported by the `tauri` crate (e.g. `DEP_TAURI_DEV`),
    // which only exists when the `app` feature pulls in the desktop runtime.
    if std::env::var_os("CARGO_FEATURE_APP").is_some() {
        tauri_build::build()
    }
}

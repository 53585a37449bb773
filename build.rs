fn main() {
    // The engine builds without Tauri; only the desktop shell needs the
    // generated context.
    #[cfg(feature = "desktop")]
    {
        tauri_build::build();
    }

    println!("cargo:rerun-if-changed=tauri.conf.json");
    println!("cargo:rerun-if-changed=src/db/schemas");
}

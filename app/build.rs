fn main() {
    // Settings are baked in by toml-cfg; rebuild when they change.
    println!("cargo:rerun-if-changed=cfg.toml");
    println!("cargo:rerun-if-changed=build.rs");
}

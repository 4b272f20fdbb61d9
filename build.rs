use std::env;
use std::fs;
use std::path::Path;

fn main() {
    let crate_dir = env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set");

    // Vendor return codes for C callers
    let header_path = Path::new(&crate_dir).join("include/eaas_pkcs11_vendor.h");
    if let Some(parent) = header_path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            println!("cargo:warning=Failed to create include/ directory: {}", e);
        }
    }

    let generated = cbindgen::Builder::new()
        .with_src(Path::new(&crate_dir).join("src/pkcs11/vendor.rs"))
        .with_language(cbindgen::Language::C)
        .with_include_guard("EAAS_PKCS11_VENDOR_H")
        .with_header("/* Vendor-defined CK_RV codes returned by the EaaS PKCS#11 shim. */")
        .generate();

    match generated {
        Ok(bindings) => {
            if !bindings.write_to_file(&header_path) {
                println!("cargo:info=eaas_pkcs11_vendor.h unchanged");
            }
        }
        Err(e) => println!("cargo:warning=cbindgen failed, vendor header not written: {}", e),
    }

    println!("cargo:rerun-if-changed=src/pkcs11/vendor.rs");
    println!("cargo:rerun-if-changed=build.rs");
}

//! Generates `volley.h` for C callers into `OUT_DIR`.

use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=src");

    let (Ok(crate_dir), Ok(out_dir)) = (env::var("CARGO_MANIFEST_DIR"), env::var("OUT_DIR")) else {
        println!("cargo:warning=cargo did not set CARGO_MANIFEST_DIR or OUT_DIR");
        return;
    };
    let header = PathBuf::from(out_dir).join("volley.h");

    match cbindgen::Builder::new()
        .with_crate(crate_dir)
        .with_language(cbindgen::Language::C)
        .with_include_guard("VOLLEY_H")
        .generate()
    {
        Ok(bindings) => {
            bindings.write_to_file(&header);
        }
        Err(err) => println!("cargo:warning=volley.h not generated: {err}"),
    }
}

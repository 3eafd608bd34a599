// build.rs
// Compiles the Swift FoundationModels shim and tells cargo how to link it
// Only Apple targets with the `foundation-models` feature build the shim;
// every other target builds the pure Rust session layer

use std::env;
use std::path::PathBuf;
use std::process::Command;

const SHIM_SOURCE: &str = "swift/FoundationModelsShim.swift";

fn main() {
    // Rerun if the Swift source changes
    println!("cargo:rerun-if-changed={}", SHIM_SOURCE);
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_FOUNDATION_MODELS");

    // Get target information
    let target = env::var("TARGET").expect("TARGET environment variable not set by cargo");
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR environment variable not set by cargo");

    let shim_enabled = env::var_os("CARGO_FEATURE_FOUNDATION_MODELS").is_some();
    let is_apple = target.contains("-apple-");
    if !shim_enabled || !is_apple {
        return;
    }

    // Detect platform
    let is_ios_device = target.contains("aarch64-apple-ios") && !target.contains("sim");
    let is_ios_simulator = target.contains("apple-ios") && target.contains("sim");
    let is_macos = target.contains("apple-darwin");

    // Configure based on platform
    let (lib_name, sdk, link_type) = if is_ios_device {
        ("libFoundationModelsShim.a", Some("iphoneos"), "static")
    } else if is_ios_simulator {
        ("libFoundationModelsShim.a", Some("iphonesimulator"), "static")
    } else if is_macos {
        ("libFoundationModelsShim.dylib", None, "dylib")
    } else {
        panic!(
            "Unsupported Apple target: {}. \
             The FoundationModels shim supports:\n\
             - aarch64-apple-ios (iOS device)\n\
             - aarch64-apple-ios-sim (iOS simulator)\n\
             - aarch64-apple-darwin (Apple Silicon macOS)\n\
             - x86_64-apple-darwin (Intel macOS)\n\
             Disable the `foundation-models` feature to build without it.",
            target
        );
    };

    let lib_path = PathBuf::from(&out_dir).join(lib_name);
    let lib_path_str = lib_path
        .to_str()
        .expect("Output path contains invalid UTF-8");

    // Step 1: Compile Swift library
    let mut cmd = Command::new("swiftc");
    cmd.args([
        "-emit-library",
        "-o",
        lib_path_str,
        "-module-name",
        "FoundationModelsShim",
        SHIM_SOURCE,
        "-framework",
        "Foundation",
        "-framework",
        "FoundationModels",
    ]);
    if link_type == "static" {
        cmd.arg("-static");
    }

    // Add SDK and target triple for iOS builds
    if let Some(sdk) = sdk {
        let sdk_path = Command::new("xcrun")
            .args(["--sdk", sdk, "--show-sdk-path"])
            .output()
            .expect("Failed to execute xcrun. Make sure Xcode is installed.");
        let sdk_path = String::from_utf8_lossy(&sdk_path.stdout).trim().to_string();
        cmd.args(["-sdk", &sdk_path]);
        cmd.args(["-target", &swift_target(&target)]);
    }

    let status = cmd
        .status()
        .expect("Failed to execute swiftc. Make sure Swift is installed.");

    if !status.success() {
        panic!("Swift compilation failed for target: {}", target);
    }

    // Step 2: Configure linking
    println!("cargo:rustc-link-lib={}=FoundationModelsShim", link_type);
    println!("cargo:rustc-link-search=native={}", out_dir);

    // Link system frameworks (available on both iOS and macOS)
    println!("cargo:rustc-link-lib=framework=Foundation");
    println!("cargo:rustc-link-lib=framework=FoundationModels");
}

/// Maps a Rust target triple to the triple swiftc expects
fn swift_target(target: &str) -> String {
    match target {
        "aarch64-apple-ios" => "arm64-apple-ios26.0".into(),
        "aarch64-apple-ios-sim" => "arm64-apple-ios26.0-simulator".into(),
        "x86_64-apple-ios" => "x86_64-apple-ios26.0-simulator".into(),
        other => other.to_string(),
    }
}

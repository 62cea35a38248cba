use std::env;
use std::path::{Path, PathBuf};

const WATCHED_VARIABLES: [&str; 4] = ["FFMPEG_DIR", "VCPKG_ROOT", "VCPKGRS_DYNAMIC", "VCPKGRS_TRIPLET"];

fn warn(message: &str) {
    println!("cargo:warning={message}");
}

/// FFmpeg prefix a vcpkg install would use for the configured triplet.
fn vcpkg_ffmpeg_prefix(vcpkg_root: &Path) -> PathBuf {
    let triplet = env::var("VCPKGRS_TRIPLET").unwrap_or_else(|_| "x64-windows".to_string());
    vcpkg_root.join("installed").join(triplet)
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for variable in WATCHED_VARIABLES {
        println!("cargo:rerun-if-env-changed={variable}");
    }

    // ffmpeg-sys-next finds FFmpeg through pkg-config everywhere except Windows.
    if env::var("CARGO_CFG_TARGET_OS").unwrap_or_default() != "windows"
        || env::var_os("FFMPEG_DIR").is_some()
    {
        return;
    }

    let Some(vcpkg_root) = env::var_os("VCPKG_ROOT").map(PathBuf::from) else {
        warn("FFMPEG_DIR is not set. Install FFmpeg with vcpkg and set VCPKG_ROOT and FFMPEG_DIR to build the video encoder.");
        return;
    };

    let prefix = vcpkg_ffmpeg_prefix(&vcpkg_root);
    if !prefix.exists() {
        warn(&format!("VCPKG_ROOT is set but no FFmpeg install was found at {}.", prefix.display()));
        return;
    }

    warn(&format!(
        "Found vcpkg FFmpeg at {0}. Set FFMPEG_DIR={0} so ffmpeg-sys-next uses it.",
        prefix.display()
    ));
    if env::var_os("VCPKGRS_DYNAMIC").is_none() {
        warn("Set VCPKGRS_DYNAMIC=1 when linking a dynamic vcpkg FFmpeg build.");
    }
}

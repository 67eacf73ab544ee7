//! Local storage naming for cached files
//!
//! Builds a cache structure of up to 256 shard directories, each named after
//! the first byte of the FNV-1 32-bit hash of the remote path. The file name
//! is the MD5 of the remote path, followed by the argument digest when one is
//! present, and the original extension (or a default one):
//!
//! ```text
//! base_dir/4f/a197d51bc70c732281b46e122ff7af17.bar
//! base_dir/8b/5e92c8291b661710e0d1d25db4053f0d_1ff55f50db16da0ad21b8d68ce5aa8cb.bar
//! ```

use crate::descriptor::Descriptor;
use md5::{Digest, Md5};
use std::path::{Path, PathBuf};

/// Longest suffix, dot included, that is treated as a file extension
const MAX_EXTENSION_LEN: usize = 5;

const FNV32_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;

/// FNV-1 (multiply, then xor) 32-bit hash
fn fnv1_32(data: &[u8]) -> u32 {
    data.iter().fold(FNV32_OFFSET_BASIS, |hash, byte| {
        hash.wrapping_mul(FNV32_PRIME) ^ u32::from(*byte)
    })
}

/// Two hex characters naming the shard directory for `path`
pub fn shard_dir(path: &str) -> String {
    format!("{:02x}", fnv1_32(path.as_bytes()).to_be_bytes()[0])
}

/// Extension found in the last few characters of `path`, dot included
fn extension(path: &str) -> Option<&str> {
    let dot = path.rfind('.')?;
    let ext = &path[dot..];
    if ext.len() > MAX_EXTENSION_LEN || ext.contains(['/', '\\']) {
        return None;
    }
    Some(ext)
}

/// File name (without directories) under which `descriptor` is stored
pub fn file_name(descriptor: &Descriptor, default_extension: &str) -> String {
    let hashed = hex::encode(Md5::digest(descriptor.path().as_bytes()));
    let ext = extension(descriptor.path()).unwrap_or(default_extension);

    if descriptor.args_digest().is_empty() {
        format!("{}{}", hashed, ext)
    } else {
        format!("{}_{}{}", hashed, descriptor.args_digest(), ext)
    }
}

/// Full local path for `descriptor`. Does not check whether the file exists.
pub fn storage_path(base_dir: &Path, descriptor: &Descriptor, default_extension: &str) -> PathBuf {
    let name = file_name(descriptor, default_extension);
    let mut path = base_dir.join(shard_dir(descriptor.path()));

    // The name is a single leaf; anything that could climb out of the shard
    // directory is flattened.
    path.push(name.replace(['/', '\\'], "_").trim_start_matches('.'));
    path
}

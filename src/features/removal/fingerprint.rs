use std::fmt;

use sha2::{Digest, Sha256};

/// 图片内容指纹：原始字节的 SHA-256（小写十六进制，64 字符）。
///
/// 仅用作结果缓存的键，不参与任何鉴权。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

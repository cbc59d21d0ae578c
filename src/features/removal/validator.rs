use axum::body::Bytes;
use thiserror::Error;

/// 允许的扩展名（仅用于错误提示文案）
pub const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// 允许的声明 MIME 类型
pub const ALLOWED_MIME_TYPES: &[&str] = &["image/png", "image/jpeg", "image/webp"];

/// 一次请求中上传的图片（完整缓冲在内存中，处理完即丢弃）
#[derive(Debug, Clone)]
pub struct UploadedImage {
    /// 原始字节
    pub bytes: Bytes,
    /// 客户端声明的 Content-Type（原样保留）
    pub content_type: Option<String>,
    /// 客户端声明的文件名
    pub file_name: Option<String>,
}

impl UploadedImage {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// 规范化后的 MIME：去掉参数、去空白、转小写；缺省为空串。
    pub fn mimetype(&self) -> String {
        self.content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
            .unwrap_or_default()
    }

    fn has_file(&self) -> bool {
        self.file_name.as_deref().is_some_and(|n| !n.is_empty())
    }
}

/// 上传校验错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// 字段存在但没有附带文件
    #[error("No file provided")]
    NoFile,

    /// 声明的 MIME 不在白名单内
    #[error("Unsupported file type: {mimetype}. Allowed: {}", ALLOWED_EXTENSIONS.join(", "))]
    UnsupportedType { mimetype: String },

    /// 超过大小上限
    #[error("File too large. Max size: {:?}MB", megabytes(.max_bytes))]
    TooLarge { size: usize, max_bytes: u64 },
}

fn megabytes(bytes: &u64) -> f64 {
    *bytes as f64 / (1024.0 * 1024.0)
}

/// 上传校验器：只看声明的 MIME 与字节数。
///
/// 注意：MIME 取自客户端声明，不做内容嗅探；伪造类型的文件会在解码阶段失败。
#[derive(Debug, Clone)]
pub struct ImageValidator {
    max_bytes: u64,
}

impl ImageValidator {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn validate(&self, upload: &UploadedImage) -> Result<(), ValidationError> {
        if !upload.has_file() {
            return Err(ValidationError::NoFile);
        }

        let mimetype = upload.mimetype();
        if !ALLOWED_MIME_TYPES.contains(&mimetype.as_str()) {
            return Err(ValidationError::UnsupportedType { mimetype });
        }

        let size = upload.size();
        if size as u64 > self.max_bytes {
            return Err(ValidationError::TooLarge {
                size,
                max_bytes: self.max_bytes,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(content_type: Option<&str>, file_name: Option<&str>, len: usize) -> UploadedImage {
        UploadedImage {
            bytes: Bytes::from(vec![0u8; len]),
            content_type: content_type.map(str::to_string),
            file_name: file_name.map(str::to_string),
        }
    }

    #[test]
    fn accepts_allowed_types_within_limit() {
        let v = ImageValidator::new(1024);
        for ct in ["image/png", "image/jpeg", "image/webp", "IMAGE/PNG; charset=binary"] {
            assert_eq!(v.validate(&upload(Some(ct), Some("a.png"), 10)), Ok(()));
        }
    }

    #[test]
    fn rejects_missing_file_name() {
        let v = ImageValidator::new(1024);
        assert_eq!(
            v.validate(&upload(Some("image/png"), None, 10)),
            Err(ValidationError::NoFile)
        );
        assert_eq!(
            v.validate(&upload(Some("image/png"), Some(""), 10)),
            Err(ValidationError::NoFile)
        );
    }

    #[test]
    fn unsupported_type_message_lists_extensions() {
        let v = ImageValidator::new(1024);
        let err = v
            .validate(&upload(Some("text/plain"), Some("a.txt"), 10))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unsupported file type: text/plain. Allowed: png, jpg, jpeg, webp"
        );
    }

    #[test]
    fn gif_is_not_allowed() {
        let v = ImageValidator::new(1024);
        assert!(matches!(
            v.validate(&upload(Some("image/gif"), Some("a.gif"), 10)),
            Err(ValidationError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn too_large_message_uses_fractional_megabytes() {
        let v = ImageValidator::new(16 * 1024 * 1024);
        let err = v
            .validate(&upload(Some("image/png"), Some("a.png"), 16 * 1024 * 1024 + 1))
            .unwrap_err();
        assert_eq!(err.to_string(), "File too large. Max size: 16.0MB");
    }

    #[test]
    fn exact_limit_is_accepted() {
        let v = ImageValidator::new(100);
        assert!(v.validate(&upload(Some("image/png"), Some("a.png"), 100)).is_ok());
        assert!(v.validate(&upload(Some("image/png"), Some("a.png"), 101)).is_err());
    }

    #[test]
    fn type_is_checked_before_size() {
        let v = ImageValidator::new(1);
        assert!(matches!(
            v.validate(&upload(Some("text/plain"), Some("a.txt"), 10)),
            Err(ValidationError::UnsupportedType { .. })
        ));
    }
}

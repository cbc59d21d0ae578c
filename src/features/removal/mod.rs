//! 背景去除：上传校验 → 内容指纹 → 结果缓存 → 引擎适配 → 响应格式化

pub mod adapter;
pub mod cache;
pub mod fingerprint;
pub mod handler;
pub mod models;
pub mod segmenter;
pub mod validator;

pub use adapter::{PngCompression, ProcessingFailure, RemovalAdapter, RemovalStage};
pub use cache::ResultCache;
pub use fingerprint::Fingerprint;
pub use handler::create_removal_router;
pub use segmenter::{BackgroundRemover, EdgeKeyRemover, SegmentationError, SegmentationOutput};
pub use validator::{ImageValidator, UploadedImage, ValidationError};

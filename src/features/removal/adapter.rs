use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, GrayAlphaImage, GrayImage, RgbImage, RgbaImage};
use thiserror::Error;

use super::segmenter::{BackgroundRemover, SegmentationError, SegmentationOutput};

/// 处理阶段（仅用于日志定位）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalStage {
    Decode,
    Segment,
    Normalize,
    Encode,
}

impl fmt::Display for RemovalStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RemovalStage::Decode => "decode",
            RemovalStage::Segment => "segment",
            RemovalStage::Normalize => "normalize",
            RemovalStage::Encode => "encode",
        };
        f.write_str(s)
    }
}

/// 失败的底层原因
#[derive(Error, Debug)]
pub enum RemovalCause {
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Segmentation(#[from] SegmentationError),
    #[error("{0}")]
    Shape(String),
}

/// 背景去除失败：对外只暴露通用文案，阶段与底层原因仅写入日志。
#[derive(Error, Debug)]
#[error("Failed to process image: {source}")]
pub struct ProcessingFailure {
    stage: RemovalStage,
    #[source]
    source: RemovalCause,
}

impl ProcessingFailure {
    fn at(stage: RemovalStage) -> impl FnOnce(RemovalCause) -> Self {
        move |source| Self { stage, source }
    }

    pub fn stage(&self) -> RemovalStage {
        self.stage
    }
}

/// PNG 输出压缩档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PngCompression {
    Fast,
    #[default]
    Default,
    Best,
}

impl PngCompression {
    /// 从配置字符串解析；未知值回退到 `Default`。
    pub fn from_config(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fast" => PngCompression::Fast,
            "best" => PngCompression::Best,
            _ => PngCompression::Default,
        }
    }

    fn as_codec(self) -> CompressionType {
        match self {
            PngCompression::Fast => CompressionType::Fast,
            PngCompression::Default => CompressionType::Default,
            PngCompression::Best => CompressionType::Best,
        }
    }
}

/// 包装分割引擎：解码 → 归一色彩模式 → 引擎 → 归一输出 → PNG 编码。
#[derive(Clone)]
pub struct RemovalAdapter {
    engine: Arc<dyn BackgroundRemover>,
    compression: PngCompression,
}

impl RemovalAdapter {
    pub fn new(engine: Arc<dyn BackgroundRemover>, compression: PngCompression) -> Self {
        Self {
            engine,
            compression,
        }
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// 同步执行一次背景去除，返回 PNG 字节。调用方需放入阻塞线程池。
    pub fn remove_background(&self, bytes: &[u8]) -> Result<Vec<u8>, ProcessingFailure> {
        let decoded = image::load_from_memory(bytes)
            .map_err(RemovalCause::from)
            .map_err(ProcessingFailure::at(RemovalStage::Decode))?;

        let input = ensure_rgb_or_rgba(decoded);

        let output = self
            .engine
            .remove(input)
            .map_err(RemovalCause::from)
            .map_err(ProcessingFailure::at(RemovalStage::Segment))?;

        let result = normalize_output(output).map_err(ProcessingFailure::at(RemovalStage::Normalize))?;

        self.encode_png(&result)
            .map_err(RemovalCause::from)
            .map_err(ProcessingFailure::at(RemovalStage::Encode))
    }

    fn encode_png(&self, img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
        let mut buf = Cursor::new(Vec::new());
        let encoder =
            PngEncoder::new_with_quality(&mut buf, self.compression.as_codec(), FilterType::Adaptive);
        img.write_with_encoder(encoder)?;
        Ok(buf.into_inner())
    }
}

impl fmt::Debug for RemovalAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemovalAdapter")
            .field("engine", &self.engine.name())
            .field("compression", &self.compression)
            .finish()
    }
}

/// 非 RGB8/RGBA8 的输入（灰度、16 位、调色板展开后的 LA 等）统一转为 RGBA8。
fn ensure_rgb_or_rgba(img: DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => img,
        other => DynamicImage::ImageRgba8(other.to_rgba8()),
    }
}

fn normalize_output(output: SegmentationOutput) -> Result<DynamicImage, RemovalCause> {
    match output {
        SegmentationOutput::Image(img) => Ok(img),
        SegmentationOutput::Encoded(bytes) => Ok(image::load_from_memory(&bytes)?),
        SegmentationOutput::Pixels {
            width,
            height,
            channels,
            data,
        } => {
            let expected = width as usize * height as usize * channels as usize;
            if data.len() != expected {
                return Err(RemovalCause::Shape(format!(
                    "pixel buffer has {} bytes, expected {width}x{height}x{channels} = {expected}",
                    data.len()
                )));
            }
            let img = match channels {
                1 => GrayImage::from_raw(width, height, data).map(DynamicImage::ImageLuma8),
                2 => GrayAlphaImage::from_raw(width, height, data).map(DynamicImage::ImageLumaA8),
                3 => RgbImage::from_raw(width, height, data).map(DynamicImage::ImageRgb8),
                4 => RgbaImage::from_raw(width, height, data).map(DynamicImage::ImageRgba8),
                n => {
                    return Err(RemovalCause::Shape(format!(
                        "unsupported channel count: {n}"
                    )));
                }
            };
            img.ok_or_else(|| RemovalCause::Shape("pixel buffer does not fit dimensions".into()))
        }
    }
}

use std::collections::VecDeque;

use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use thiserror::Error;

/// 分割引擎错误
#[derive(Error, Debug)]
pub enum SegmentationError {
    /// 输入图片不满足引擎要求
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),
    /// 推理/计算失败
    #[error("segmentation failed: {0}")]
    Failed(String),
}

/// 分割引擎的异构返回值。
///
/// 不同引擎可能直接给出解码后的图像、编码后的字节或裸像素数组，
/// 统一由适配层归一化为 `DynamicImage`。
#[derive(Debug, Clone)]
pub enum SegmentationOutput {
    /// 已解码的图像
    Image(DynamicImage),
    /// 编码后的图片字节（PNG 等）
    Encoded(Vec<u8>),
    /// 行优先的 H×W×C 像素数组，C 取 1..=4（L / LA / RGB / RGBA）
    Pixels {
        width: u32,
        height: u32,
        channels: u8,
        data: Vec<u8>,
    },
}

/// 背景去除引擎。
///
/// 实现方为同步、可能耗时数秒的 CPU 密集调用，调用方负责将其移出异步运行时。
/// 传入的图像保证为 RGB8 或 RGBA8。
pub trait BackgroundRemover: Send + Sync {
    /// 引擎名称（用于日志）
    fn name(&self) -> &'static str;

    fn remove(&self, image: DynamicImage) -> Result<SegmentationOutput, SegmentationError>;
}

/// 内置引擎：边缘取色抠图。
///
/// 以边框像素的逐通道中位数作为背景色，从所有接近背景色的边框像素出发做四连通洪泛，
/// 被覆盖的像素 alpha 置 0。适合纯色/近纯色背景的商品图、证件照。
#[derive(Debug, Clone)]
pub struct EdgeKeyRemover {
    tolerance: u8,
}

impl EdgeKeyRemover {
    pub fn new(tolerance: u8) -> Self {
        Self { tolerance }
    }

    fn close_to(&self, px: &Rgba<u8>, bg: [u8; 3]) -> bool {
        px.0[..3]
            .iter()
            .zip(bg.iter())
            .all(|(a, b)| a.abs_diff(*b) <= self.tolerance)
    }
}

impl Default for EdgeKeyRemover {
    fn default() -> Self {
        Self::new(24)
    }
}

impl BackgroundRemover for EdgeKeyRemover {
    fn name(&self) -> &'static str {
        "edge-key"
    }

    fn remove(&self, image: DynamicImage) -> Result<SegmentationOutput, SegmentationError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(SegmentationError::UnsupportedInput(
                "image has zero area".to_string(),
            ));
        }

        let mut rgba = image.into_rgba8();
        let bg = estimate_background(&rgba);

        let w = width as usize;
        let mut visited = vec![false; w * height as usize];
        let mut queue = VecDeque::new();

        for (x, y) in border_coords(width, height) {
            let idx = y as usize * w + x as usize;
            if !visited[idx] && self.close_to(rgba.get_pixel(x, y), bg) {
                visited[idx] = true;
                queue.push_back((x, y));
            }
        }

        while let Some((x, y)) = queue.pop_front() {
            rgba.get_pixel_mut(x, y).0[3] = 0;

            let neighbors = [
                (x.checked_sub(1), Some(y)),
                (x.checked_add(1).filter(|nx| *nx < width), Some(y)),
                (Some(x), y.checked_sub(1)),
                (Some(x), y.checked_add(1).filter(|ny| *ny < height)),
            ];
            for (nx, ny) in neighbors {
                let (Some(nx), Some(ny)) = (nx, ny) else {
                    continue;
                };
                let idx = ny as usize * w + nx as usize;
                if !visited[idx] && self.close_to(rgba.get_pixel(nx, ny), bg) {
                    visited[idx] = true;
                    queue.push_back((nx, ny));
                }
            }
        }

        Ok(SegmentationOutput::Image(DynamicImage::ImageRgba8(rgba)))
    }
}

fn border_coords(width: u32, height: u32) -> impl Iterator<Item = (u32, u32)> {
    let top_bottom = (0..width).flat_map(move |x| [(x, 0), (x, height - 1)]);
    let left_right = (0..height).flat_map(move |y| [(0, y), (width - 1, y)]);
    top_bottom.chain(left_right)
}

/// 边框像素逐通道中位数
fn estimate_background(img: &RgbaImage) -> [u8; 3] {
    let (width, height) = img.dimensions();
    let mut channels: [Vec<u8>; 3] = Default::default();
    for (x, y) in border_coords(width, height) {
        let px = img.get_pixel(x, y);
        for (c, values) in channels.iter_mut().enumerate() {
            values.push(px.0[c]);
        }
    }
    channels.map(|mut values| {
        values.sort_unstable();
        values[values.len() / 2]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn framed_image() -> DynamicImage {
        // 12x12 白底，中间 4x4 红块
        let mut img = RgbImage::from_pixel(12, 12, Rgb([250, 250, 250]));
        for y in 4..8 {
            for x in 4..8 {
                img.put_pixel(x, y, Rgb([200, 10, 10]));
            }
        }
        DynamicImage::ImageRgb8(img)
    }

    fn unwrap_rgba(out: SegmentationOutput) -> RgbaImage {
        match out {
            SegmentationOutput::Image(img) => img.into_rgba8(),
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[test]
    fn background_becomes_transparent_and_subject_stays() {
        let out = unwrap_rgba(EdgeKeyRemover::default().remove(framed_image()).unwrap());
        assert_eq!(out.get_pixel(0, 0).0[3], 0);
        assert_eq!(out.get_pixel(11, 11).0[3], 0);
        assert_eq!(out.get_pixel(3, 5).0[3], 0);
        assert_eq!(out.get_pixel(5, 5).0, [200, 10, 10, 255]);
    }

    #[test]
    fn uniform_image_is_fully_cleared() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, Rgb([255, 0, 0])));
        let out = unwrap_rgba(EdgeKeyRemover::default().remove(img).unwrap());
        assert!(out.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn enclosed_background_colored_region_is_kept() {
        // 被主体包围的“背景色”像素不与边框连通，不应被抠掉
        let mut img = RgbImage::from_pixel(9, 9, Rgb([255, 255, 255]));
        for y in 2..7 {
            for x in 2..7 {
                img.put_pixel(x, y, Rgb([0, 0, 0]));
            }
        }
        img.put_pixel(4, 4, Rgb([255, 255, 255]));
        let out = unwrap_rgba(
            EdgeKeyRemover::default()
                .remove(DynamicImage::ImageRgb8(img))
                .unwrap(),
        );
        assert_eq!(out.get_pixel(4, 4).0[3], 255);
        assert_eq!(out.get_pixel(0, 4).0[3], 0);
    }

    #[test]
    fn zero_tolerance_only_clears_exact_matches() {
        let mut img = RgbImage::from_pixel(5, 5, Rgb([100, 100, 100]));
        img.put_pixel(0, 0, Rgb([101, 100, 100]));
        let out = unwrap_rgba(
            EdgeKeyRemover::new(0)
                .remove(DynamicImage::ImageRgb8(img))
                .unwrap(),
        );
        assert_eq!(out.get_pixel(0, 0).0[3], 255);
        assert_eq!(out.get_pixel(2, 2).0[3], 0);
    }

    #[test]
    fn single_pixel_image_is_supported() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(1, 1, Rgb([1, 2, 3])));
        let out = unwrap_rgba(EdgeKeyRemover::default().remove(img).unwrap());
        assert_eq!(out.get_pixel(0, 0).0[3], 0);
    }
}

//! Always-local visual summary: brightness, contrast, saturation, and a
//! naive k-means dominant-color palette. The one piece of numerical code
//! in this crate not backed by an existing detector/strategy, because the
//! source material it's grounded on (`_analyze_visual_properties`,
//! `_get_dominant_colors`) hand-rolls the same k-means rather than reaching
//! for a library, and there's no reason to diverge from that here.

use vpipe_adapters::Frame;
use vpipe_core::models::VisualSummary;

const KMEANS_K: usize = 3;
const KMEANS_ITERATIONS: usize = 10;
const KMEANS_TOLERANCE: f32 = 1.0;
const SENTINEL_GRAY: (u8, u8, u8) = (128, 128, 128);

#[must_use]
pub fn compute_visual_summary(frame: &Frame) -> VisualSummary {
    match try_compute(frame) {
        Some(summary) => summary,
        None => VisualSummary {
            analysis_id: vpipe_core::ids::AnalysisId::new(),
            dominant_colors: vec![SENTINEL_GRAY],
            brightness_level: 0.0,
            contrast_level: 0.0,
            saturation_level: 0.0,
        },
    }
}

fn try_compute(frame: &Frame) -> Option<VisualSummary> {
    let pixel_count = (frame.width as usize) * (frame.height as usize);
    if pixel_count == 0 || frame.rgb8.len() < pixel_count * 3 {
        return None;
    }

    let brightness = mean_intensity(&frame.rgb8) / 255.0;
    let contrast = grayscale_stddev(&frame.rgb8) / 255.0;
    let saturation = mean_saturation(&frame.rgb8) / 255.0;
    let dominant_colors = kmeans_palette(&frame.rgb8, pixel_count);

    Some(VisualSummary {
        analysis_id: vpipe_core::ids::AnalysisId::new(),
        dominant_colors,
        brightness_level: brightness,
        contrast_level: contrast,
        saturation_level: saturation,
    })
}

fn mean_intensity(rgb8: &[u8]) -> f32 {
    let sum: u64 = rgb8.iter().map(|&b| b as u64).sum();
    sum as f32 / rgb8.len() as f32
}

fn grayscale_stddev(rgb8: &[u8]) -> f32 {
    let grays: Vec<f32> = rgb8
        .chunks_exact(3)
        .map(|p| 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32)
        .collect();
    if grays.is_empty() {
        return 0.0;
    }
    let mean = grays.iter().sum::<f32>() / grays.len() as f32;
    let variance = grays.iter().map(|g| (g - mean).powi(2)).sum::<f32>() / grays.len() as f32;
    variance.sqrt()
}

fn mean_saturation(rgb8: &[u8]) -> f32 {
    let mut total = 0.0f32;
    let mut count = 0usize;
    for p in rgb8.chunks_exact(3) {
        let (r, g, b) = (p[0] as f32, p[1] as f32, p[2] as f32);
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let s = if max > 0.0 { (max - min) / max } else { 0.0 };
        total += s * 255.0;
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        total / count as f32
    }
}

/// Naive Lloyd's-algorithm k-means over pixel RGB values. Centroids start
/// at evenly-spaced samples rather than random picks, so results are
/// deterministic across runs of the same frame.
fn kmeans_palette(rgb8: &[u8], pixel_count: usize) -> Vec<(u8, u8, u8)> {
    let pixels: Vec<[f32; 3]> = rgb8
        .chunks_exact(3)
        .map(|p| [p[0] as f32, p[1] as f32, p[2] as f32])
        .collect();
    if pixels.is_empty() {
        return vec![SENTINEL_GRAY];
    }

    let k = KMEANS_K.min(pixels.len());
    let step = pixel_count / k.max(1);
    let mut centroids: Vec<[f32; 3]> = (0..k).map(|i| pixels[i * step]).collect();

    for _ in 0..KMEANS_ITERATIONS {
        let mut sums = vec![[0f32; 3]; k];
        let mut counts = vec![0u32; k];

        for pixel in &pixels {
            let nearest = nearest_centroid(pixel, &centroids);
            sums[nearest][0] += pixel[0];
            sums[nearest][1] += pixel[1];
            sums[nearest][2] += pixel[2];
            counts[nearest] += 1;
        }

        let mut max_shift = 0f32;
        for i in 0..k {
            if counts[i] == 0 {
                continue;
            }
            let new_centroid = [
                sums[i][0] / counts[i] as f32,
                sums[i][1] / counts[i] as f32,
                sums[i][2] / counts[i] as f32,
            ];
            let shift = distance(&centroids[i], &new_centroid);
            max_shift = max_shift.max(shift);
            centroids[i] = new_centroid;
        }

        if max_shift < KMEANS_TOLERANCE {
            break;
        }
    }

    centroids
        .into_iter()
        .map(|c| (c[0].round() as u8, c[1].round() as u8, c[2].round() as u8))
        .collect()
}

fn nearest_centroid(pixel: &[f32; 3], centroids: &[[f32; 3]]) -> usize {
    centroids
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            distance(pixel, a)
                .partial_cmp(&distance(pixel, b))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn distance(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_frame_has_zero_contrast_and_saturation() {
        let frame = Frame::new(4, 4, vec![100u8; 4 * 4 * 3]);
        let summary = compute_visual_summary(&frame);
        assert!(summary.contrast_level < 0.001);
        assert!(summary.saturation_level < 0.001);
        assert!((summary.brightness_level - 100.0 / 255.0).abs() < 0.01);
    }

    #[test]
    fn undersized_buffer_falls_back_to_sentinel() {
        let frame = Frame::new(10, 10, vec![0u8; 3]);
        let summary = compute_visual_summary(&frame);
        assert_eq!(summary.dominant_colors, vec![SENTINEL_GRAY]);
        assert_eq!(summary.brightness_level, 0.0);
    }

    #[test]
    fn kmeans_recovers_two_distinct_blocks() {
        let mut rgb8 = vec![0u8; 4 * 2 * 3];
        for pixel in rgb8.chunks_exact_mut(3).take(4) {
            pixel.copy_from_slice(&[250, 10, 10]);
        }
        for pixel in rgb8.chunks_exact_mut(3).skip(4) {
            pixel.copy_from_slice(&[10, 10, 250]);
        }
        let frame = Frame::new(4, 2, rgb8);
        let summary = compute_visual_summary(&frame);
        assert_eq!(summary.dominant_colors.len(), 3);
    }
}

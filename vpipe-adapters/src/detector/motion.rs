//! Motion analysis by frame differencing: decodes every frame of a segment,
//! downsamples to grayscale, and scores motion as the fraction of pixels
//! that changed enough between consecutive frames to count as "moved".
//! Simpler than the background-subtraction model it's grounded on, but
//! answers the same question (how much of the frame is moving) without a
//! background-subtractor implementation of our own to maintain.

use async_trait::async_trait;
use vpipe_core::error::{Error, Result};

use crate::detector::{MotionSummary, VideoAnalyzer};

const CHANGED_PIXEL_THRESHOLD: u8 = 25;

pub struct LocalMotionAnalyzer;

impl LocalMotionAnalyzer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for LocalMotionAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VideoAnalyzer for LocalMotionAnalyzer {
    async fn analyze(&self, segment_path: &str) -> Result<MotionSummary> {
        let segment_path = segment_path.to_string();
        tokio::task::spawn_blocking(move || analyze_blocking(&segment_path))
            .await
            .map_err(|e| Error::Internal(format!("motion analysis task panicked: {e}")))?
    }
}

fn analyze_blocking(segment_path: &str) -> Result<MotionSummary> {
    ffmpeg_next::init().map_err(|e| Error::DecodeFailed(format!("ffmpeg init: {e}")))?;

    let mut input = ffmpeg_next::format::input(&segment_path)
        .map_err(|e| Error::SegmentNotFound(format!("{segment_path}: {e}")))?;

    let stream = input
        .streams()
        .best(ffmpeg_next::media::Type::Video)
        .ok_or_else(|| Error::DecodeFailed("no video stream in segment".to_string()))?;
    let stream_index = stream.index();

    let context = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
        .map_err(|e| Error::DecodeFailed(format!("codec context: {e}")))?;
    let mut decoder = context
        .decoder()
        .video()
        .map_err(|e| Error::DecodeFailed(format!("video decoder: {e}")))?;

    let mut scaler = ffmpeg_next::software::scaling::Context::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        ffmpeg_next::format::Pixel::GRAY8,
        decoder.width(),
        decoder.height(),
        ffmpeg_next::software::scaling::Flags::BILINEAR,
    )
    .map_err(|e| Error::DecodeFailed(format!("scaler setup: {e}")))?;

    let mut previous: Option<Vec<u8>> = None;
    let mut motion_scores = Vec::new();
    let mut frame_count = 0u32;
    let mut decoded = ffmpeg_next::frame::Video::empty();
    let mut gray = ffmpeg_next::frame::Video::empty();

    for (stream, packet) in input.packets() {
        if stream.index() != stream_index {
            continue;
        }
        decoder
            .send_packet(&packet)
            .map_err(|e| Error::DecodeFailed(format!("send_packet: {e}")))?;

        while decoder.receive_frame(&mut decoded).is_ok() {
            scaler
                .run(&decoded, &mut gray)
                .map_err(|e| Error::DecodeFailed(format!("scale to gray: {e}")))?;
            let pixels = gray.data(0).to_vec();

            if let Some(prev) = &previous {
                motion_scores.push(frame_motion_score(prev, &pixels));
            }
            previous = Some(pixels);
            frame_count += 1;
        }
    }

    if motion_scores.is_empty() {
        return Ok(MotionSummary {
            frame_count,
            ..MotionSummary::default()
        });
    }

    let average_motion = motion_scores.iter().sum::<f32>() / motion_scores.len() as f32;
    let max_motion = motion_scores.iter().cloned().fold(0.0f32, f32::max);

    Ok(MotionSummary {
        average_motion,
        max_motion,
        activity_score: average_motion * 10.0,
        frame_count,
    })
}

/// Fraction of pixels whose luma changed by more than `CHANGED_PIXEL_THRESHOLD`.
fn frame_motion_score(previous: &[u8], current: &[u8]) -> f32 {
    if previous.len() != current.len() || previous.is_empty() {
        return 0.0;
    }
    let changed = previous
        .iter()
        .zip(current.iter())
        .filter(|(a, b)| a.abs_diff(**b) > CHANGED_PIXEL_THRESHOLD)
        .count();
    changed as f32 / previous.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_frames_have_zero_motion() {
        let frame = vec![100u8; 64];
        assert_eq!(frame_motion_score(&frame, &frame), 0.0);
    }

    #[test]
    fn fully_changed_frame_scores_one() {
        let previous = vec![0u8; 64];
        let current = vec![255u8; 64];
        assert_eq!(frame_motion_score(&previous, &current), 1.0);
    }

    #[test]
    fn mismatched_lengths_score_zero() {
        assert_eq!(frame_motion_score(&[1, 2, 3], &[1, 2]), 0.0);
    }
}

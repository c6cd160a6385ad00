//! Local OCR via the `tesseract` CLI binary, invoked as a subprocess and
//! parsed from its TSV word-box output — no OCR crate in the ecosystem
//! wraps the engine as directly as shelling out to the binary itself does.

use async_trait::async_trait;
use std::io::Write;
use tokio::process::Command;
use tracing::warn;
use vpipe_core::error::{Error, Result};
use vpipe_core::models::{BoundingBox, Capability};

use crate::detector::{Frame, ImageDetector, RawDetection};

pub struct LocalOcrAdapter {
    tesseract_binary: String,
}

impl LocalOcrAdapter {
    #[must_use]
    pub fn new(tesseract_binary: impl Into<String>) -> Self {
        Self {
            tesseract_binary: tesseract_binary.into(),
        }
    }
}

impl Default for LocalOcrAdapter {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

/// Parses `tesseract ... tsv` output into word-level detections, skipping
/// non-word rows (`conf == -1`) and blank text, mirroring `image_to_data`'s
/// per-word filtering.
fn parse_tsv(tsv: &str, width: u32, height: u32, confidence_threshold: f32) -> Vec<RawDetection> {
    let width = width.max(1) as f32;
    let height = height.max(1) as f32;
    let mut out = Vec::new();

    for line in tsv.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }
        let conf: f32 = match fields[10].parse() {
            Ok(c) => c,
            Err(_) => continue,
        };
        if conf < 0.0 {
            continue;
        }
        let confidence = conf / 100.0;
        let text = fields[11..].join("\t");
        let text = text.trim();
        if text.is_empty() || confidence < confidence_threshold {
            continue;
        }

        let (left, top, w, h) = match (
            fields[6].parse::<f32>(),
            fields[7].parse::<f32>(),
            fields[8].parse::<f32>(),
            fields[9].parse::<f32>(),
        ) {
            (Ok(l), Ok(t), Ok(w), Ok(h)) => (l, t, w, h),
            _ => continue,
        };

        out.push(RawDetection {
            label: text.to_string(),
            confidence,
            bbox: Some(BoundingBox::new(
                left / width,
                top / height,
                w / width,
                h / height,
            )),
        });
    }

    out
}

impl LocalOcrAdapter {
    async fn try_detect(&self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<RawDetection>> {
        let jpeg = frame.to_jpeg(95)?;

        let mut input_file = tempfile::Builder::new()
            .suffix(".jpg")
            .tempfile()
            .map_err(|e| Error::Internal(format!("tesseract temp file: {e}")))?;
        input_file
            .as_file_mut()
            .write_all(&jpeg)
            .map_err(|e| Error::Internal(format!("tesseract temp file write: {e}")))?;

        let output = Command::new(&self.tesseract_binary)
            .arg(input_file.path())
            .arg("stdout")
            .arg("tsv")
            .output()
            .await
            .map_err(|e| Error::AdapterTransient(format!("tesseract spawn failed: {e}")))?;

        if !output.status.success() {
            return Err(Error::AdapterTransient(format!(
                "tesseract exited with {}",
                output.status
            )));
        }

        let tsv = String::from_utf8(output.stdout)
            .map_err(|e| Error::DecodeFailed(format!("tesseract output not utf8: {e}")))?;

        Ok(parse_tsv(&tsv, frame.width, frame.height, confidence_threshold))
    }
}

#[async_trait]
impl ImageDetector for LocalOcrAdapter {
    async fn detect(&self, frame: &Frame, confidence_threshold: f32) -> Vec<RawDetection> {
        match self.try_detect(frame, confidence_threshold).await {
            Ok(detections) => detections,
            Err(e) => {
                warn!(error = %e, "local ocr adapter: detection failed");
                Vec::new()
            }
        }
    }

    fn capability(&self) -> Capability {
        Capability::TextDetection
    }

    fn model_identifier(&self) -> &str {
        "tesseract"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
1\t1\t0\t0\t0\t0\t0\t0\t100\t100\t-1\t\n\
5\t1\t1\t1\t1\t1\t10\t20\t30\t15\t92.5\tHELLO\n\
5\t1\t1\t1\t1\t2\t50\t20\t20\t15\t10.0\tfaint\n";

    #[test]
    fn parses_word_rows_above_threshold() {
        let results = parse_tsv(SAMPLE_TSV, 100, 100, 0.5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].label, "HELLO");
        assert!((results[0].confidence - 0.925).abs() < 0.001);
        let bbox = results[0].bbox.unwrap();
        assert!((bbox.x - 0.10).abs() < 0.001);
    }

    #[test]
    fn skips_low_confidence_words() {
        let results = parse_tsv(SAMPLE_TSV, 100, 100, 0.9);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].label, "HELLO");
    }
}

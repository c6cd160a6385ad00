//! WHAT to detect (`detector`) and WHERE to run it (`strategy`), kept
//! orthogonal per the source material this crate is modeled on: an adapter
//! knows how to turn a frame or segment into detections, a strategy decides
//! whether that work happens in-process, on a LAN worker, or in the cloud.

pub mod detector;
pub mod strategy;

pub use detector::{Frame, ImageDetector, MotionSummary, RawDetection, VideoAnalyzer};
pub use strategy::{build_strategy, ExecutionStrategy, StrategyInfo};

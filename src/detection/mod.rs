//! Anomaly detection over terminal output

mod loop_detector;

pub use loop_detector::{
    LoopAlert, LoopDetector, MIN_CHUNK_LENGTH, REPEAT_THRESHOLD, SIMILARITY_THRESHOLD,
    WINDOW_SIZE,
};

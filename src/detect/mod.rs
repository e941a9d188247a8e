mod backend;
pub mod backends;
mod result;

pub use backend::{parse_detections, AnalysisError, DetectionBackend, RawDetection};
pub use backends::{GeminiBackend, GeminiSettings, StubBackend};
pub use result::{BoundingBox, DetectionResult, Violation, ViolationClass, NORMALIZED_SCALE};

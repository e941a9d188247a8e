use crate::detect::backend::{AnalysisError, DetectionBackend, RawDetection};
use crate::frame::Frame;

/// Scripted backend for demos and offline runs.
///
/// Each call returns the next entry of the script, wrapping around at the end.
pub struct StubBackend {
    script: Vec<Vec<RawDetection>>,
    calls: usize,
}

impl StubBackend {
    /// Two clean passes followed by a phone sighting.
    pub fn new() -> Self {
        Self::scripted(vec![
            Vec::new(),
            Vec::new(),
            vec![RawDetection::new("Mobile Phone", [400.0, 600.0, 700.0, 800.0])],
        ])
    }

    pub fn scripted(script: Vec<Vec<RawDetection>>) -> Self {
        Self { script, calls: 0 }
    }

    #[cfg(test)]
    pub(crate) fn calls(&self) -> usize {
        self.calls
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn analyze(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>, AnalysisError> {
        let index = self.calls;
        self.calls += 1;
        if self.script.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.script[index % self.script.len()].clone())
    }
}

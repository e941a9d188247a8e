use std::time::Instant;

use super::backend::RawDetection;

/// Scale of the normalized coordinates reported by detection backends.
pub const NORMALIZED_SCALE: f32 = 1000.0;

/// Axis-aligned box in pixel coordinates of the analysed frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl BoundingBox {
    /// Rescale a backend `[ymin, xmin, ymax, xmax]` box (0..=1000) into pixel
    /// space, clamped to the frame and ordered so `min <= max`.
    pub fn from_normalized(box_2d: [f32; 4], width: u32, height: u32) -> Self {
        let [ymin, xmin, ymax, xmax] = box_2d.map(clamp_normalized);
        let w = width as f32;
        let h = height as f32;
        let (x0, x1) = (xmin * w / NORMALIZED_SCALE, xmax * w / NORMALIZED_SCALE);
        let (y0, y1) = (ymin * h / NORMALIZED_SCALE, ymax * h / NORMALIZED_SCALE);
        Self {
            xmin: x0.min(x1),
            ymin: y0.min(y1),
            xmax: x0.max(x1),
            ymax: y0.max(y1),
        }
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }
}

fn clamp_normalized(v: f32) -> f32 {
    if v.is_finite() {
        v.clamp(0.0, NORMALIZED_SCALE)
    } else {
        0.0
    }
}

/// Prohibited object classes the proctoring prompt asks for.
///
/// Labels outside this set are kept verbatim on the `Violation` but map to
/// `Unknown` (class id 99).
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ViolationClass {
    MobilePhone,
    CheatSheet,
    SmartWatch,
    AnotherPerson,
    Unknown,
}

impl ViolationClass {
    pub const KNOWN: [ViolationClass; 4] = [
        ViolationClass::MobilePhone,
        ViolationClass::CheatSheet,
        ViolationClass::SmartWatch,
        ViolationClass::AnotherPerson,
    ];

    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        Self::KNOWN
            .into_iter()
            .find(|class| class.label().eq_ignore_ascii_case(label))
            .unwrap_or(ViolationClass::Unknown)
    }

    pub fn label(self) -> &'static str {
        match self {
            ViolationClass::MobilePhone => "Mobile Phone",
            ViolationClass::CheatSheet => "Cheat Sheet",
            ViolationClass::SmartWatch => "Smart Watch",
            ViolationClass::AnotherPerson => "Another Person",
            ViolationClass::Unknown => "Unknown",
        }
    }

    pub fn class_id(self) -> u8 {
        match self {
            ViolationClass::MobilePhone => 0,
            ViolationClass::CheatSheet => 1,
            ViolationClass::SmartWatch => 2,
            ViolationClass::AnotherPerson => 3,
            ViolationClass::Unknown => 99,
        }
    }
}

/// One detected prohibited object or condition.
#[derive(Clone, Debug, PartialEq)]
pub struct Violation {
    /// Label as reported by the backend.
    pub label: String,
    pub class: ViolationClass,
    pub bbox: BoundingBox,
}

impl Violation {
    pub fn from_raw(raw: &RawDetection, width: u32, height: u32) -> Self {
        Self {
            label: raw.label.clone(),
            class: ViolationClass::from_label(&raw.label),
            bbox: BoundingBox::from_normalized(raw.box_2d, width, height),
        }
    }
}

/// Violations found in one analysis pass.
///
/// An empty result means the pass saw nothing prohibited; it does not mean
/// "unknown". The initial monitor state is an empty result with no
/// `observed_at`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionResult {
    violations: Vec<Violation>,
    observed_at: Option<Instant>,
}

impl DetectionResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn observed(violations: Vec<Violation>, observed_at: Instant) -> Self {
        Self {
            violations,
            observed_at: Some(observed_at),
        }
    }

    /// Convert backend output for a `width` x `height` frame.
    pub fn from_raw(raw: &[RawDetection], width: u32, height: u32, observed_at: Instant) -> Self {
        let violations = raw
            .iter()
            .map(|det| Violation::from_raw(det, width, height))
            .collect();
        Self::observed(violations, observed_at)
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn observed_at(&self) -> Option<Instant> {
        self.observed_at
    }

    pub fn labels(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.label.clone()).collect()
    }
}

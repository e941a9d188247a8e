pub mod gemini;
pub mod stub;

pub use gemini::{GeminiBackend, GeminiSettings};
pub use stub::StubBackend;

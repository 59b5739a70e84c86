pub mod recognizer;

pub use recognizer::{PlateRecognizer, RecognizerStats};

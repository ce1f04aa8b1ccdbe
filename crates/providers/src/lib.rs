//! External capabilities: the code generation backend plus the local
//! speech, OCR and document helpers that feed it input.

pub mod document;
pub mod generate;
pub mod ocr;
pub mod speech;

pub use generate::{CodeGenerator, GenerateClient, GenerateError};
pub use speech::{SpeechError, Transcriber};

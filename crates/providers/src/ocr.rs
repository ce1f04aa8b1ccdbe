use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Reads text out of screenshots by shelling out to a tesseract-style
/// CLI (`<program> <image> stdout`).
pub struct OcrEngine {
    program: String,
}

impl OcrEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub async fn extract_text(&self, image: &Path) -> Result<String> {
        let output = Command::new(&self.program)
            .arg(image)
            .arg("stdout")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("{} failed: {}", self.program, stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

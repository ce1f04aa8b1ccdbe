pub mod types;

pub mod settings {
    use serde::{Deserialize, Serialize};
    use std::path::PathBuf;

    fn default_api_url() -> String {
        "http://127.0.0.1:11434/api/generate".to_string()
    }

    fn default_model() -> String {
        "codellama".to_string()
    }

    fn default_speech_command() -> String {
        "whisper-cli".to_string()
    }

    fn default_ocr_command() -> String {
        "tesseract".to_string()
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct AppSettings {
        /// Generation endpoint, Ollama-style `/api/generate`.
        #[serde(default = "default_api_url")]
        pub api_url: String,
        #[serde(default = "default_model")]
        pub model: String,
        /// Overrides the platform data directory when set.
        #[serde(default)]
        pub data_dir: Option<PathBuf>,
        /// External recognizer invoked as `<command> <wav-path>`.
        #[serde(default = "default_speech_command")]
        pub speech_command: String,
        /// OCR binary invoked as `<command> <image> stdout`.
        #[serde(default = "default_ocr_command")]
        pub ocr_command: String,
        /// Carry bandit values across logins instead of starting from zero.
        #[serde(default)]
        pub persist_bandit: bool,
        /// Accept only the first feedback per generated snippet.
        #[serde(default)]
        pub single_feedback_per_artifact: bool,
        /// Wall-clock cap for snippet execution, in seconds. Unlimited when absent.
        #[serde(default)]
        pub execution_timeout_secs: Option<u64>,
    }

    impl Default for AppSettings {
        fn default() -> Self {
            Self {
                api_url: default_api_url(),
                model: default_model(),
                data_dir: None,
                speech_command: default_speech_command(),
                ocr_command: default_ocr_command(),
                persist_bandit: false,
                single_feedback_per_artifact: false,
                execution_timeout_secs: None,
            }
        }
    }

}

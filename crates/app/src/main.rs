use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use engine::{SessionController, SessionPolicy};
use providers::generate::GenerateClient;
use shared::settings::AppSettings;
use storage::{CredentialStore, TenantStores};
use tracing::warn;

mod shell;

fn config_path() -> Option<PathBuf> {
    if let Some(proj) = directories::ProjectDirs::from("com.local", "Codesmith", "Codesmith") {
        let path = proj.config_dir().join("settings.json");
        let _ = fs::create_dir_all(proj.config_dir());
        Some(path)
    } else {
        None
    }
}

fn default_data_dir() -> PathBuf {
    if let Some(proj) = directories::ProjectDirs::from("com.local", "Codesmith", "Codesmith") {
        proj.data_dir().to_path_buf()
    } else {
        PathBuf::from(".codesmith")
    }
}

fn load_settings_or_default() -> AppSettings {
    if let Some(path) = config_path() {
        if path.exists() {
            match fs::read(&path) {
                Ok(bytes) => match serde_json::from_slice::<AppSettings>(&bytes) {
                    Ok(settings) => return settings,
                    Err(e) => warn!("Ignoring unreadable settings file: {}", e),
                },
                Err(e) => warn!("Could not read settings file: {}", e),
            }
            return AppSettings::default();
        }
        // Fresh install: write the defaults so they are easy to edit
        let settings = AppSettings::default();
        save_settings(&settings);
        return settings;
    }
    AppSettings::default()
}

fn save_settings(settings: &AppSettings) {
    if let Some(path) = config_path() {
        match serde_json::to_vec_pretty(settings) {
            Ok(bytes) => {
                if let Err(e) = fs::write(&path, bytes) {
                    warn!("Could not save settings: {}", e);
                }
            }
            Err(e) => warn!("Could not serialize settings: {}", e),
        }
    }
}

fn apply_env_overrides(settings: &mut AppSettings) {
    if let Ok(url) = std::env::var("CODESMITH_API_URL") {
        settings.api_url = url;
    }
    if let Ok(model) = std::env::var("CODESMITH_MODEL") {
        settings.model = model;
    }
    if let Ok(dir) = std::env::var("CODESMITH_DATA_DIR") {
        settings.data_dir = Some(PathBuf::from(dir));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut settings = load_settings_or_default();
    apply_env_overrides(&mut settings);

    let data_dir = settings.data_dir.clone().unwrap_or_else(default_data_dir);
    let credentials = CredentialStore::open(&data_dir.join("users.sqlite"))?;
    let tenants = TenantStores::open(&data_dir.join("tenants"))?;
    let generator = Arc::new(GenerateClient::new(&settings.api_url, &settings.model));
    let policy = SessionPolicy {
        persist_bandit: settings.persist_bandit,
        single_feedback_per_artifact: settings.single_feedback_per_artifact,
        execution_timeout: settings.execution_timeout_secs.map(Duration::from_secs),
    };
    let controller = SessionController::new(credentials, tenants, generator, policy);

    shell::run(&controller, &settings).await
}

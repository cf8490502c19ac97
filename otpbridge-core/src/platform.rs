//! Platform-specific directory resolution

use std::path::PathBuf;

const APP_DIR: &str = "OtpBridge";

/// Get the platform-specific data directory for storing application data
///
/// Returns:
/// - Windows: %LOCALAPPDATA%\OtpBridge
/// - macOS: ~/Library/Application Support/OtpBridge
/// - Linux/Other: ~/.local/share/OtpBridge
pub fn get_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".data")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR)
}

/// Get the platform-specific config directory
pub fn get_config_dir() -> PathBuf {
    let base = dirs::config_dir()
        .or_else(dirs::data_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR)
}

/// Get the default credential database path
pub fn get_default_database_path() -> PathBuf {
    get_data_dir().join("credentials.db")
}

/// Get the default configuration file path
pub fn get_default_config_path() -> PathBuf {
    get_config_dir().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_live_under_app_dir() {
        assert!(get_data_dir().ends_with(APP_DIR));
        assert!(get_config_dir().ends_with(APP_DIR));
        assert_eq!(
            get_default_database_path().parent(),
            Some(get_data_dir().as_path())
        );
        assert!(get_default_config_path().ends_with("config.toml"));
    }
}

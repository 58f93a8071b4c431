//! Default paths for camguardd components
//!
//! - Socket: `$XDG_RUNTIME_DIR/camguardd/camguardd.sock` or `/tmp/camguardd-$USER/camguardd.sock`
//! - Data: `$XDG_DATA_HOME/camguardd` or `~/.local/share/camguardd`
//! - Config: `$XDG_CONFIG_HOME/camguardd/config.toml` or `~/.config/camguardd/config.toml`

use std::path::PathBuf;

/// Environment variable for overriding the socket path
pub const CAMGUARD_SOCKET_ENV: &str = "CAMGUARD_SOCKET";

/// Environment variable for overriding the data directory
pub const CAMGUARD_DATA_DIR_ENV: &str = "CAMGUARD_DATA_DIR";

/// Environment variable for overriding the config file
pub const CAMGUARD_CONFIG_ENV: &str = "CAMGUARD_CONFIG";

const SOCKET_FILENAME: &str = "camguardd.sock";
const CONFIG_FILENAME: &str = "config.toml";
const STATE_FILENAME: &str = "state.json";
const APP_DIR: &str = "camguardd";

/// Get the default socket path.
///
/// Order of precedence:
/// 1. `$CAMGUARD_SOCKET`
/// 2. `$XDG_RUNTIME_DIR/camguardd/camguardd.sock`
/// 3. `/tmp/camguardd-$USER/camguardd.sock`
pub fn default_socket_path() -> PathBuf {
    if let Ok(path) = std::env::var(CAMGUARD_SOCKET_ENV) {
        return PathBuf::from(path);
    }

    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_DIR).join(SOCKET_FILENAME);
    }

    let username = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/{}-{}", APP_DIR, username)).join(SOCKET_FILENAME)
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$CAMGUARD_DATA_DIR`
/// 2. `$XDG_DATA_HOME/camguardd`
/// 3. `~/.local/share/camguardd`
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(CAMGUARD_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CAMGUARD_CONFIG_ENV) {
        return PathBuf::from(path);
    }

    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILENAME);
    }

    PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILENAME)
}

/// Location of the persisted state document inside a data directory
pub fn state_file_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join(STATE_FILENAME)
}

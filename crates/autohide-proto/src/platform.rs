use std::path::PathBuf;

pub const DEFAULT_API_PORT: u16 = 8990;
pub const DEFAULT_API_HOST: &str = "127.0.0.1";

pub fn data_dir() -> PathBuf {
    // On macOS and Linux, use ~/.local/share/autohide/ (XDG standard)
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("autohide")
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("autohide")
    }
}

pub fn config_dir() -> PathBuf {
    // On Windows, a config.json next to the executable wins (portable install)
    #[cfg(windows)]
    {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                if exe_dir.join("config.json").exists() {
                    return exe_dir.to_path_buf();
                }
            }
        }
    }

    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("autohide")
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("autohide")
    }
}

pub fn log_file() -> PathBuf {
    data_dir().join("autohide.log")
}

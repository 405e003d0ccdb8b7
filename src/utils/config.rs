use dotenv::dotenv;
use std::env;
use std::path::PathBuf;

pub struct Config {
    pub name: String,
    pub config_dir: PathBuf,
    pub theme: String,
    pub logger_level: String,
    pub logger_dir: PathBuf,
    pub logger_stderr: bool,
}

impl Config {
    fn get_config_dir() -> PathBuf {
        match env::var("HOME") {
            Ok(home) if !home.is_empty() => PathBuf::from(home).join(".config/kosh"),
            _ => env::temp_dir().join("kosh"),
        }
    }

    fn default() -> Self {
        let config_dir = Self::get_config_dir();
        Config {
            name: String::from("kosh"),
            logger_dir: config_dir.join("logs"),
            config_dir,
            theme: String::from("default"),
            logger_level: String::from("warn"),
            logger_stderr: false,
        }
    }

    pub fn new() -> Self {
        if cfg!(debug_assertions) {
            dotenv::from_filename(".env.development").ok();
        } else {
            dotenv().ok();
        }

        let mut config = Config::default();
        config.apply(|key| env::var(key).ok());
        config
    }

    /// Overrides defaults with `KOSH_*` values from `lookup`.
    fn apply<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(theme) = lookup("KOSH_THEME") {
            self.theme = theme;
        }
        if let Some(level) = lookup("KOSH_LOG_LEVEL") {
            self.logger_level = level;
        }
        if let Some(dir) = lookup("KOSH_LOG_DIR") {
            self.logger_dir = PathBuf::from(dir);
        }
        if let Some(flag) = lookup("KOSH_LOG_STDERR") {
            self.logger_stderr = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true");
        }
    }
}

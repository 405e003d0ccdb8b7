use colored::Colorize;

pub type Style = Box<dyn Fn(String) -> String + Send + Sync>;

pub struct Theme {
    pub name: String,
    pub user_style: Style,
    pub dir_style: Style,
    pub notice_style: Style,
}

impl Default for Theme {
    fn default() -> Self {
        Theme {
            name: String::from("default"),
            user_style: Box::new(|s| s.bright_green().bold().to_string()),
            dir_style: Box::new(|s| s.bright_blue().bold().to_string()),
            notice_style: Box::new(|s| s.bright_magenta().to_string()),
        }
    }
}

impl Theme {
    pub fn plain() -> Self {
        Theme {
            name: String::from("plain"),
            user_style: Box::new(|s| s),
            dir_style: Box::new(|s| s),
            notice_style: Box::new(|s| s),
        }
    }

    pub fn load_theme(theme_name: &str) -> Theme {
        match theme_name {
            "plain" => Theme::plain(),
            _ => Theme::default(),
        }
    }

    /// `user@host:dir$ `
    pub fn prompt(&self, user: &str, host: &str, dir: &str) -> String {
        format!(
            "{}:{}$ ",
            (self.user_style)(format!("{}@{}", user, host)),
            (self.dir_style)(dir.to_string())
        )
    }
}

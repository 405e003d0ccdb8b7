use std::env;
use std::process;

use log::{debug, warn};

use kosh::shell::{ExecOption, Invokable, Shell};
use kosh::utils::config::Config;
use kosh::utils::log::init_logger;
use kosh::utils::theme::Theme;

fn main() {
    let config = Config::new();
    if let Err(err) = init_logger(&config) {
        eprintln!("kosh: logging disabled: {}", err);
    }
    debug!("config loaded from {}", config.config_dir.display());

    let theme = Theme::load_theme(&config.theme);
    if theme.name != config.theme {
        warn!("unknown theme {}, using {}", config.theme, theme.name);
    }

    let args: Vec<String> = env::args().collect();
    let mut shell = Shell::new(ExecOption::default()).with_theme(theme);
    let code = shell.main(&args);
    process::exit(code)
}

//! Config command - inspect the configuration file.

use std::path::Path;

use tilesched::SchedulerConfig;

/// Print the path of the configuration file in use.
pub fn run_path(path: &Path) {
    println!("{}", path.display());
    if !path.exists() {
        println!("(file does not exist, defaults are in effect)");
    }
}

/// Print the effective configuration in INI form.
pub fn run_show(config: &SchedulerConfig) {
    print!("{}", config.to_config_string());
}

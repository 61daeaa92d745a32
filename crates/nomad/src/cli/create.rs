//! `nomad create`: scaffolds a new migration file.

use console::style;
use nomad_core::config::Config;
use nomad_core::Result;

pub fn run(config_path: &str, name: &str) -> Result<()> {
    let config = Config::from_file(config_path)?;
    let path = crate::fsops::scaffold(&config.dir, name)?;
    println!("{} {}", style("created").green(), path.display());
    Ok(())
}

//! Config command implementation.

use anyhow::Result;

use super::{ConfigAction, ConfigArgs};

/// Run the config command.
pub async fn run(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let config = fontorrent_core::Config::load()?;
            println!();
            println!("Fontorrent Configuration");
            println!("{}", "─".repeat(50));
            println!();
            println!("[scheduler]");
            println!(
                "  refresh_interval = \"{:?}\"",
                config.scheduler.refresh_interval
            );
            println!();
            println!("[export]");
            println!(
                "  metadata_poll_interval = \"{:?}\"",
                config.export.metadata_poll_interval
            );
            println!(
                "  metadata_timeout = \"{:?}\"",
                config.export.metadata_timeout
            );
            match config.export.whole_content_limit {
                Some(limit) => println!("  whole_content_limit = {}", limit),
                None => println!("  whole_content_limit = (none)"),
            }
            println!();
            println!("[trackers]");
            println!("  allow_insecure = {}", config.trackers.allow_insecure);
            println!(
                "  preferences_path = \"{}\"",
                config.preferences_path().display()
            );
            println!();
        }

        ConfigAction::Path => {
            println!("{}", fontorrent_core::Config::config_path().display());
        }

        ConfigAction::Reset => {
            let config = fontorrent_core::Config::default();
            config.save()?;
            println!("Configuration reset to defaults.");
        }
    }

    Ok(())
}

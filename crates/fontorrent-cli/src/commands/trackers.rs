//! Trackers command implementation.

use anyhow::Result;

use super::{open_tracker_store, TrackersAction, TrackersArgs};

/// Run the trackers command.
pub async fn run(args: TrackersArgs) -> Result<()> {
    let mut store = open_tracker_store();

    match args.action {
        TrackersAction::List { json } => {
            if json {
                let output = serde_json::json!({
                    "trackers": store.trackers(),
                    "accepted_schemes": store.policy().describe(),
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                print_list("Configured trackers", store.trackers());
            }
        }

        TrackersAction::Set { urls } => {
            let saved = store.save(&urls)?;
            report_dropped(&urls, saved);
            print_list("Trackers saved", saved);
        }

        TrackersAction::Add { urls } => {
            let mut combined = store.trackers().to_vec();
            combined.extend(urls.iter().cloned());
            let saved = store.save(&combined)?;
            report_dropped(&urls, saved);
            print_list("Trackers saved", saved);
        }

        TrackersAction::Reset => {
            let restored = store.reset();
            print_list("Trackers reset to defaults", restored);
        }
    }

    Ok(())
}

fn print_list(title: &str, trackers: &[String]) {
    println!();
    println!("{} ({})", title, trackers.len());
    println!("{}", "─".repeat(50));
    for tracker in trackers {
        println!("  {}", tracker);
    }
    println!();
}

fn report_dropped(requested: &[String], saved: &[String]) {
    for url in requested {
        let url = url.trim();
        if !saved.iter().any(|s| s == url) {
            eprintln!("  Skipped unsupported tracker: {}", url);
        }
    }
}

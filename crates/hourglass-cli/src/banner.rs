use std::path::Path;

use hourglass_config::AppConfig;

/// Print the startup banner with a config summary.
pub fn print_banner(config: &AppConfig, config_path: &Path, registered: usize) {
    for line in render_banner(config, config_path, registered) {
        println!("{line}");
    }
}

fn render_banner(config: &AppConfig, config_path: &Path, registered: usize) -> Vec<String> {
    let version = env!("CARGO_PKG_VERSION");

    let migrations = if config.skip_migrations {
        "disabled".to_string()
    } else {
        format!(
            "{registered} registered migration{}",
            if registered == 1 { "" } else { "s" }
        )
    };

    let display = |path: &Path| match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => path.to_string_lossy().replace(&home, "~"),
        _ => path.to_string_lossy().to_string(),
    };

    // Layout
    let width = 64;
    let label_w = 12;
    let value_w = width - label_w - 5; // "│ " + " " + "│" + padding

    let title = format!("Hourglass v{version}");
    let title_dashes = width - 2 - title.len() - 5;
    let top = format!("╭─── {title} {}╮", "─".repeat(title_dashes));
    let bottom = format!("╰{}╯", "─".repeat(width - 2));

    let row = |l: &str, r: &str| {
        let mut value = r.to_string();
        if value.chars().count() > value_w {
            let tail: String = value
                .chars()
                .rev()
                .take(value_w - 1)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            value = format!("…{tail}");
        }
        format!("│ {l:<label_w$} {value:<value_w$} │")
    };

    vec![
        top,
        row("", ""),
        row("Environment", &config.env),
        row("Config", &display(config_path)),
        row("Database", &display(&config.db.name)),
        row("Migrations", &migrations),
        row("", ""),
        bottom,
    ]
}

//! Config validation CLI tool
//!
//! Validates a camguardd configuration file and reports any errors.

use camguard_util::default_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a camguardd configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config config.example.toml");
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match camguard_config::load_config(&config_path) {
        Ok(policy) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", camguard_config::CURRENT_CONFIG_VERSION);
            let monitored: Vec<String> = policy
                .channels
                .monitored
                .iter()
                .map(|c| c.to_string())
                .collect();
            println!("  Monitored channels: {}", monitored.join(", "));
            println!("  Punishment channel: {}", policy.channels.punishment);
            println!(
                "  Moderation: {} (grace {}s, timeouts {}s / {}s)",
                if policy.moderation.enabled { "on" } else { "off" },
                policy.moderation.grace_period.as_secs(),
                policy.moderation.short_timeout.as_secs(),
                policy.moderation.long_timeout.as_secs(),
            );
            println!(
                "  Auto-pause: {}",
                if policy.auto_pause.enabled { "on" } else { "off" }
            );
            println!("  Stats rotation: {} UTC", policy.stats.rotation_time);
            println!("  Stream URL: {}", policy.browser.target_url);
            println!(
                "  Exempt: {} allowed users, {} admin roles, {} bots",
                policy.roles.allowed_users.len(),
                policy.roles.admin_roles.len(),
                policy.roles.exempt_bots.len(),
            );

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                camguard_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                camguard_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                camguard_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                camguard_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        camguard_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}

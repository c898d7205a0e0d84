//! Init and config check commands

use anyhow::{Context, Result, bail};

use loyalty_engine::LoyaltyConfig;

use super::Paths;

/// Write the default configuration
pub fn init_command(paths: &Paths, force: bool) -> Result<()> {
    let config_path = &paths.config;
    if config_path.exists() && !force {
        bail!(
            "Configuration already exists: {}\nUse --force to overwrite.",
            config_path.display()
        );
    }

    LoyaltyConfig::with_defaults().save_to_file(config_path)?;
    println!("Created: {}", config_path.display());

    Ok(())
}

/// Parse and validate the configuration without touching the ledger
pub fn check_config_command(paths: &Paths) -> Result<()> {
    let config = LoyaltyConfig::from_file(&paths.config)?;
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, path = %paths.config.display(), "Invalid configuration");
        return Err(e).with_context(|| format!("Invalid config: {}", paths.config.display()));
    }

    println!("Configuration OK: {}", paths.config.display());
    println!("  Tiers:        {}", config.tiers.len());
    for tier in &config.tiers {
        let upper = tier
            .max_points
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "    {:<10} {:>7} .. {:<7} x{:.2}  bonus {}",
            tier.id, tier.min_points, upper, tier.multiplier, tier.welcome_bonus
        );
    }
    println!("  Achievements: {}", config.achievements.len());
    println!("  Challenges:   {}", config.challenges.len());
    println!("  Rewards:      {}", config.rewards.len());
    println!(
        "  Referral:     {} (referrer {}, referee {})",
        if config.referral.active { "active" } else { "inactive" },
        config.referral.referrer_reward,
        config.referral.referee_reward
    );

    Ok(())
}

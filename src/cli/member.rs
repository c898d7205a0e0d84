//! Member commands: enroll, balance, history, referral, status

use anyhow::{Result, bail};

use loyalty_engine::{LoyaltyEvent, MemberStatus};

use super::{Paths, open_service};

pub fn enroll_command(paths: &Paths, user_id: &str, referral_code: Option<&str>) -> Result<()> {
    let service = open_service(paths)?;
    let enrollment = service.enroll(user_id, referral_code)?;
    let member = &enrollment.member;

    if enrollment.created {
        println!("Enrolled {} as member {}", user_id, member.id);
    } else {
        println!("{} is already member {}", user_id, member.id);
    }
    println!("  Referral code: {}", member.referral_code);
    println!("  Tier:          {}", member.tier_id);

    match &enrollment.referral {
        Some(Ok(credit)) if credit.duplicate => println!("  Referral already credited"),
        Some(Ok(credit)) => println!(
            "  Referral credited: +{} to you, +{} to {}",
            credit.referee_transaction.points,
            credit.referrer_transaction.points,
            credit.referrer_id
        ),
        Some(Err(reason)) => println!("  Referral not credited: {}", reason),
        None => {}
    }
    print_events(&enrollment.events);

    Ok(())
}

pub fn balance_command(paths: &Paths, member_id: &str) -> Result<()> {
    let service = open_service(paths)?;
    let view = service.get_balance(member_id)?;

    println!("Member {}", view.member_id);
    println!("  Balance:  {}", view.balance);
    println!("  Lifetime: {}", view.lifetime_points);
    println!("  Tier:     {}", view.tier);
    if let Some(next) = service.tier_table().next(&view.tier) {
        println!(
            "  Next:     {} at {} ({} to go)",
            next.name,
            next.min_points,
            (next.min_points - view.lifetime_points).max(0)
        );
    }

    Ok(())
}

pub fn history_command(paths: &Paths, member_id: &str) -> Result<()> {
    let service = open_service(paths)?;
    let history = service.history(member_id)?;
    println!("{}", serde_json::to_string_pretty(&history)?);
    Ok(())
}

pub fn referral_command(paths: &Paths, referral_code: &str, new_member_id: &str) -> Result<()> {
    let service = open_service(paths)?;
    let credit = service.process_referral(referral_code, new_member_id)?;

    if credit.duplicate {
        println!("Referral already credited");
    }
    println!(
        "  {} +{} ({})",
        credit.referrer_id, credit.referrer_transaction.points, credit.referrer_transaction.id
    );
    println!(
        "  {} +{} ({})",
        credit.referee_id, credit.referee_transaction.points, credit.referee_transaction.id
    );

    Ok(())
}

pub fn status_command(paths: &Paths, member_id: &str, status: &str) -> Result<()> {
    let Some(status) = MemberStatus::from_str(&status.to_lowercase()) else {
        bail!("Unknown status: {status} (expected active, inactive or suspended)");
    };

    let service = open_service(paths)?;
    let member = service.set_member_status(member_id, status)?;
    println!("Member {} is now {}", member.id, member.status);

    Ok(())
}

/// Print side effects of an operation, one per line
pub fn print_events(events: &[LoyaltyEvent]) {
    for event in events {
        match event {
            LoyaltyEvent::PointsAwarded { points, .. } => println!("  +{} points", points),
            LoyaltyEvent::TierChanged { from, to, .. } => println!("  Tier: {} -> {}", from, to),
            LoyaltyEvent::BonusAwarded { tier_id, points, .. } => {
                println!("  +{} {} welcome bonus", points, tier_id)
            }
            LoyaltyEvent::AchievementUnlocked {
                achievement_id,
                points,
                ..
            } => println!("  Achievement unlocked: {} (+{})", achievement_id, points),
            LoyaltyEvent::ChallengeCompleted {
                challenge_id,
                points,
                ..
            } => println!("  Challenge completed: {} (+{})", challenge_id, points),
        }
    }
}

//! Point commands: award, redeem, adjust

use anyhow::Result;

use loyalty_engine::AwardRequest;

use super::member::print_events;
use super::{Paths, open_service};

pub fn award_command(
    paths: &Paths,
    member_id: &str,
    points: i64,
    source: &str,
    source_id: Option<String>,
    dedup_key: &str,
) -> Result<()> {
    let service = open_service(paths)?;
    let mut request = AwardRequest::new(member_id, points, source, dedup_key);
    if let Some(source_id) = source_id {
        request = request.source_id(source_id);
    }
    let award = service.award_points(request)?;

    if award.duplicate {
        println!("Already awarded ({}), nothing changed", award.transaction.id);
    } else {
        println!(
            "Awarded {} points ({} raw) to {}",
            award.transaction.points, points, member_id
        );
        print_events(&award.events);
    }
    println!("  Balance: {}", award.balance);

    Ok(())
}

pub fn redeem_command(
    paths: &Paths,
    member_id: &str,
    reward_id: &str,
    dedup_key: Option<&str>,
) -> Result<()> {
    let service = open_service(paths)?;
    let redemption = service.redeem_points(member_id, reward_id, dedup_key)?;

    if redemption.duplicate {
        println!("Already redeemed, returning original booking");
    } else {
        println!(
            "Redeemed {} for {} points",
            reward_id, -redemption.transaction.points
        );
    }
    println!("  Fulfillment token: {}", redemption.fulfillment_token);
    println!("  Balance: {}", redemption.balance);

    Ok(())
}

pub fn adjust_command(
    paths: &Paths,
    member_id: &str,
    points: i64,
    reason: &str,
    dedup_key: &str,
) -> Result<()> {
    let service = open_service(paths)?;
    let adjustment = service.adjust_points(member_id, points, reason, dedup_key)?;

    if adjustment.duplicate {
        println!("Already adjusted ({}), nothing changed", adjustment.transaction.id);
    } else {
        println!("Adjusted {} by {:+}", member_id, points);
    }
    println!("  Balance: {}", adjustment.balance);

    Ok(())
}

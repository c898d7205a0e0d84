//! Challenge commands

use anyhow::Result;

use super::member::print_events;
use super::{Paths, open_service};

pub fn join_command(paths: &Paths, member_id: &str, challenge_id: &str) -> Result<()> {
    let service = open_service(paths)?;
    let outcome = service.join_challenge(member_id, challenge_id)?;

    if outcome.already_joined {
        println!("{} already joined {}", member_id, challenge_id);
    } else {
        println!("{} joined {}", member_id, challenge_id);
    }
    println!("  Progress: {}", outcome.participation.progress);

    Ok(())
}

pub fn progress_command(
    paths: &Paths,
    member_id: &str,
    challenge_id: &str,
    delta: i64,
) -> Result<()> {
    let service = open_service(paths)?;
    let report = service.report_challenge_progress(member_id, challenge_id, delta)?;
    let outcome = &report.outcome;
    let challenge = service.challenge_catalog().get(challenge_id)?;

    println!(
        "Progress: {}/{}",
        outcome.participation.progress, challenge.target
    );
    print_events(&report.events);
    if outcome.completed_now {
        if let Some(badge) = &challenge.badge {
            println!("  Badge earned: {}", badge);
        }
    }

    Ok(())
}

pub fn leaderboard_command(paths: &Paths, challenge_id: &str) -> Result<()> {
    let service = open_service(paths)?;
    let status = service.challenge_status(challenge_id)?;
    let board = service.get_leaderboard(challenge_id)?;

    println!("Leaderboard {} [{}]:\n", challenge_id, status);
    if board.is_empty() {
        println!("  No participants yet.");
        return Ok(());
    }
    for entry in board {
        let done = if entry.completed_at.is_some() { "done" } else { "" };
        println!(
            "  {:>3}. {:<38} {:>8} {}",
            entry.rank, entry.member_id, entry.progress, done
        );
    }

    Ok(())
}

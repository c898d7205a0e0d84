//! End-to-end scenarios through the service façade

mod common;

use std::sync::Barrier;

use common::{challenge, engine, engine_with, test_config};
use loyalty_engine::{AwardRequest, LoyaltyError, LoyaltyEvent, TransactionKind};

#[test]
fn test_enrollment_pays_welcome_bonus() {
    let mut config = test_config();
    config.engine.welcome_bonus = 100;
    let t = engine_with(&config);

    let member_id = t.enroll("user-1");
    let view = t.service.get_balance(&member_id).unwrap();
    assert_eq!(view.balance, 100);
    assert_eq!(view.lifetime_points, 100);
    assert_eq!(view.tier, "bronze");
}

#[test]
fn test_repeated_award_is_credited_once() {
    let t = engine();
    let member_id = t.enroll("user-1");

    let first = t
        .service
        .award_points(AwardRequest::new(&member_id, 50, "purchase", "order-1"))
        .unwrap();
    let second = t
        .service
        .award_points(AwardRequest::new(&member_id, 50, "purchase", "order-1"))
        .unwrap();

    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(second.transaction.id, first.transaction.id);
    assert_eq!(t.balance(&member_id), 50);
    assert_eq!(t.service.history(&member_id).unwrap().len(), 1);
}

#[test]
fn test_redemption_beyond_balance_changes_nothing() {
    let mut config = test_config();
    config.engine.welcome_bonus = 100;
    let t = engine_with(&config);
    let member_id = t.enroll("user-1");

    let err = t
        .service
        .redeem_points(&member_id, "coffee", None)
        .unwrap_err();
    match err {
        LoyaltyError::InsufficientPoints {
            balance,
            required,
            shortfall,
            ..
        } => {
            assert_eq!(balance, 100);
            assert_eq!(required, 150);
            assert_eq!(shortfall, 50);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(t.balance(&member_id), 100);
    assert_eq!(t.service.history(&member_id).unwrap().len(), 1);
}

#[test]
fn test_crossing_into_silver_pays_bonus_once() {
    let t = engine();
    let member_id = t.enroll("user-1");
    t.service
        .award_points(AwardRequest::new(&member_id, 900, "purchase", "order-1"))
        .unwrap();
    assert_eq!(t.service.get_balance(&member_id).unwrap().tier, "bronze");

    let award = t
        .service
        .award_points(AwardRequest::new(&member_id, 150, "purchase", "order-2"))
        .unwrap();
    assert!(award.events.iter().any(|e| matches!(
        e,
        LoyaltyEvent::BonusAwarded { tier_id, points: 50, .. } if tier_id == "silver"
    )));

    let view = t.service.get_balance(&member_id).unwrap();
    assert_eq!(view.tier, "silver");
    assert_eq!(view.lifetime_points, 1_100);

    // Further silver earnings never pay the bonus again
    t.service
        .award_points(AwardRequest::new(&member_id, 10, "purchase", "order-3"))
        .unwrap();
    let bonuses = t
        .service
        .history(&member_id)
        .unwrap()
        .into_iter()
        .filter(|tx| tx.kind == TransactionKind::Bonus)
        .count();
    assert_eq!(bonuses, 1);
}

#[test]
fn test_concurrent_duplicate_referral_credits_one_pair() {
    let t = engine();
    let alice = t.enroll("alice");
    let bob = t.enroll("bob");
    let code = t.referral_code(&alice);

    let threads = 8;
    let barrier = Barrier::new(threads);
    let credits: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    t.service.process_referral(&code, &bob)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("referral thread panicked"))
            .collect()
    });

    let credits: Vec<_> = credits.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(credits.iter().filter(|c| !c.duplicate).count(), 1);
    let first = &credits[0].referrer_transaction.id;
    assert!(credits.iter().all(|c| &c.referrer_transaction.id == first));

    assert_eq!(t.balance(&alice), 500);
    assert_eq!(t.balance(&bob), 250);
}

#[test]
fn test_challenge_completes_on_the_report_that_reaches_target() {
    let mut config = test_config();
    config.challenges = vec![challenge("ten", 10, 200)];
    let t = engine_with(&config);
    let member_id = t.enroll("user-1");

    t.service.join_challenge(&member_id, "ten").unwrap();
    let first = t
        .service
        .report_challenge_progress(&member_id, "ten", 6)
        .unwrap();
    assert!(!first.outcome.completed_now);

    let second = t
        .service
        .report_challenge_progress(&member_id, "ten", 6)
        .unwrap();
    assert!(second.outcome.completed_now);
    assert_eq!(second.outcome.participation.progress, 12);
    assert_eq!(t.balance(&member_id), 200);

    let third = t
        .service
        .report_challenge_progress(&member_id, "ten", 6)
        .unwrap();
    assert!(!third.outcome.completed_now);
    assert!(third.outcome.reward.is_none());
    assert_eq!(t.balance(&member_id), 200);
}

#[test]
fn test_referral_at_enrollment_reports_rejections_without_failing() {
    let mut config = test_config();
    config.referral.max_total = 1;
    let t = engine_with(&config);
    let alice = t.enroll("alice");
    let code = t.referral_code(&alice);

    let bob = t.service.enroll("bob", Some(&code)).unwrap();
    assert!(bob.referral.unwrap().is_ok());

    let carol = t.service.enroll("carol", Some(&code)).unwrap();
    assert!(carol.created);
    assert_eq!(
        carol.referral.unwrap().unwrap_err(),
        loyalty_engine::ReferralRejection::TotalLimitReached
    );
    assert_eq!(t.balance(&carol.member.id), 0);
}

#[test]
fn test_challenge_outside_window_is_rejected() {
    let mut config = test_config();
    config.challenges = vec![challenge("ten", 10, 200)];
    let t = engine_with(&config);
    let member_id = t.enroll("user-1");

    t.clock.advance(31 * common::DAY_MS);
    let err = t.service.join_challenge(&member_id, "ten").unwrap_err();
    assert!(matches!(err, LoyaltyError::ChallengeNotActive { .. }));
    assert!(matches!(
        t.service.join_challenge(&member_id, "missing").unwrap_err(),
        LoyaltyError::ChallengeNotFound(_)
    ));
}

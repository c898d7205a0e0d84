//! Property tests for the ledger invariants

mod common;

use std::sync::Arc;

use proptest::prelude::*;

use common::{DAY_MS, START_MS, test_config};
use loyalty_engine::{AwardRequest, LoyaltyDb, LoyaltyError, LoyaltyService, ManualClock};

#[derive(Debug, Clone)]
enum Op {
    Award(i64),
    Redeem,
    Adjust(i64),
    Advance(i64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (1_i64..600).prop_map(Op::Award),
        2 => Just(Op::Redeem),
        2 => (-400_i64..400).prop_map(Op::Adjust),
        1 => (1_i64..6).prop_map(Op::Advance),
    ]
}

fn service(clock: &ManualClock) -> LoyaltyService {
    let mut config = test_config();
    config.engine.welcome_bonus = 100;
    config.engine.points_validity_days = Some(7);
    let db = LoyaltyDb::open_in_memory().expect("in-memory db");
    LoyaltyService::new(&config, db, Arc::new(clock.clone())).expect("service")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_balance_matches_log_after_any_sequence(ops in prop::collection::vec(op(), 1..40)) {
        let clock = ManualClock::new(START_MS);
        let svc = service(&clock);
        let member_id = svc.enroll("user-1", None).expect("enroll").member.id;
        let mut last_lifetime = 0;

        for (i, op) in ops.into_iter().enumerate() {
            let result = match op {
                Op::Award(points) => svc
                    .award_points(AwardRequest::new(&member_id, points, "purchase", format!("o-{i}")))
                    .map(|_| ()),
                Op::Redeem => svc.redeem_points(&member_id, "coffee", None).map(|_| ()),
                Op::Adjust(points) => svc
                    .adjust_points(&member_id, points, "property", &format!("adj-{i}"))
                    .map(|_| ()),
                Op::Advance(days) => {
                    clock.advance(days * DAY_MS);
                    svc.expire_due().map(|_| ())
                }
            };
            match result {
                Ok(())
                | Err(LoyaltyError::InsufficientPoints { .. })
                | Err(LoyaltyError::InvalidPoints(0)) => {}
                Err(e) => return Err(TestCaseError::fail(format!("unexpected error: {e}"))),
            }

            let view = svc.get_balance(&member_id).expect("balance");
            let history = svc.history(&member_id).expect("history");
            let from_log: i64 = history.iter().map(|tx| tx.balance_contribution()).sum();
            prop_assert_eq!(view.balance, from_log);
            prop_assert!(view.balance >= 0);
            prop_assert!(svc.reconcile(&member_id).expect("reconcile").is_consistent());

            prop_assert!(view.lifetime_points >= last_lifetime);
            last_lifetime = view.lifetime_points;
            let resolved = svc.tier_table().resolve(view.lifetime_points).expect("resolve");
            prop_assert_eq!(&view.tier, &resolved.id);
        }
    }

    #[test]
    fn test_multiplier_floors_scaled_points(raw in 1_i64..100_000) {
        let clock = ManualClock::new(START_MS);
        let svc = service(&clock);
        let table = svc.tier_table();
        for tier in table.tiers() {
            let scaled = table.apply_multiplier(tier, raw);
            prop_assert!(scaled as f64 <= raw as f64 * tier.multiplier);
            prop_assert!((scaled + 1) as f64 > raw as f64 * tier.multiplier);
        }
    }
}

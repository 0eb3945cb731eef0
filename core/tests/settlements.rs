//! Integration tests for the annual charge settlement engine.
//!
//! Covers:
//! 1. Reconciliation totals, per-charge balances and status
//! 2. One settlement per contract and year
//! 3. Deposit deductions journaled with the settlement
//! 4. Approval is terminal; amendments stop at approval
//! 5. Reports, listings and provisioning plans

use chrono::{NaiveDate, TimeZone, Utc};
use leaseledger_core::{
    audit::ENTITY_SETTLEMENT,
    clock::LedgerClock,
    contract::Contract,
    deposit_ledger::DepositStatus,
    error::ErrorKind,
    ledger::LeaseLedger,
    settlement_engine::{
        ApprovalRequest, ChargeInput, DepositDeductionInput, Direction, ProvisioningRequest,
        SettlementFilters, SettlementRequest, SettlementStatus,
    },
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// In-memory ledger pinned to 2026-01-15 with contract C registered.
fn build() -> LeaseLedger {
    let _ = env_logger::builder().is_test(true).try_init();
    let clock = LedgerClock::fixed(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap());
    let mut ledger = LeaseLedger::build_test()
        .expect("build_test failed")
        .with_clock(clock);
    ledger
        .contracts()
        .register(&Contract {
            contract_id: "C".into(),
            contract_number: "2024-017".into(),
            property_id: "P-9".into(),
            tenant_id: "T-3".into(),
            owner_id: Some("O-1".into()),
            monthly_rent: dec!(1200),
            start_date: date(2024, 1, 1),
            end_date: date(2026, 7, 1),
        })
        .expect("register contract");
    ledger
}

fn utilities_2025() -> SettlementRequest {
    SettlementRequest {
        settlement_year: 2025,
        charges: vec![
            ChargeInput::new("water", dec!(120), dec!(150)),
            ChargeInput::new("electricity", dec!(240), dec!(280)),
        ],
        deposit_deductions: Vec::new(),
        settlement_date: Some(date(2026, 1, 10)),
        notes: None,
    }
}

fn approval(by: &str) -> ApprovalRequest {
    ApprovalRequest {
        approved_by: by.to_string(),
        approval_date: Some(date(2026, 1, 20)),
        notes: None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reconciliation
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn settlement_reconciles_each_charge() {
    let mut ledger = build();
    let outcome = ledger
        .settlements()
        .perform_annual_settlement("C", &utilities_2025())
        .unwrap();

    let s = &outcome.settlement;
    assert_eq!(s.total_provisioning_paid, dec!(360));
    assert_eq!(s.total_actual_cost, dec!(430));
    assert_eq!(s.balance, dec!(70));
    assert_eq!(s.status, SettlementStatus::BalanceDue);

    let mut balances: Vec<Decimal> = outcome.adjustments.iter().map(|a| a.balance).collect();
    balances.sort();
    assert_eq!(balances, vec![dec!(30), dec!(40)]);
    assert!(outcome
        .charges_breakdown
        .iter()
        .all(|c| c.direction == Direction::TenantPays));

    let stored = ledger.settlements().adjustments(&s.settlement_id).unwrap();
    assert_eq!(stored.len(), 2);
    let (prov, actual) = ledger.store.sql().sum_adjustments(&s.settlement_id).unwrap();
    assert_eq!((prov, actual), (36_000, 43_000), "totals match their adjustments");

    let trail = ledger.audit_trail(ENTITY_SETTLEMENT, &s.settlement_id).unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].action, "created");
}

#[test]
fn overpaid_provisioning_is_a_refund() {
    let mut ledger = build();
    let request = SettlementRequest {
        charges: vec![
            ChargeInput::new("heating", dec!(600), dec!(520)),
            ChargeInput::new("water", dec!(100), dec!(100)),
        ],
        ..utilities_2025()
    };
    let outcome = ledger
        .settlements()
        .perform_annual_settlement("C", &request)
        .unwrap();
    assert_eq!(outcome.settlement.balance, dec!(-80));
    assert_eq!(outcome.settlement.status, SettlementStatus::RefundDue);
    assert!(outcome
        .charges_breakdown
        .iter()
        .all(|c| c.direction == Direction::OwnerRefunds));

    let report = ledger.settlements().get_settlement_report("C", 2025).unwrap();
    assert_eq!(report.summary.balance_due_to_tenant, dec!(80));
    assert_eq!(report.summary.balance_due_to_owner, Decimal::ZERO);
}

#[test]
fn second_settlement_for_same_year_is_a_conflict() {
    let mut ledger = build();
    ledger
        .settlements()
        .perform_annual_settlement("C", &utilities_2025())
        .unwrap();

    let err = ledger
        .settlements()
        .perform_annual_settlement("C", &utilities_2025())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(ledger.store.sql().settlement_count("C", 2025).unwrap(), 1);

    // A different year is a different settlement.
    let next = SettlementRequest {
        settlement_year: 2026,
        ..utilities_2025()
    };
    ledger
        .settlements()
        .perform_annual_settlement("C", &next)
        .unwrap();
}

#[test]
fn invalid_settlement_input_is_rejected() {
    let mut ledger = build();
    let cases = [
        SettlementRequest {
            settlement_year: 0,
            ..utilities_2025()
        },
        SettlementRequest {
            charges: vec![ChargeInput::new("water", dec!(-5), dec!(10))],
            ..utilities_2025()
        },
        SettlementRequest {
            charges: vec![
                ChargeInput::new("water", dec!(1), dec!(2)),
                ChargeInput::new("water", dec!(3), dec!(4)),
            ],
            ..utilities_2025()
        },
        SettlementRequest {
            deposit_deductions: vec![DepositDeductionInput {
                deduction_type: "".into(),
                amount: dec!(10),
            }],
            ..utilities_2025()
        },
    ];
    for request in &cases {
        let err = ledger
            .settlements()
            .perform_annual_settlement("C", request)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "for {request:?}");
    }
    assert_eq!(ledger.store.sql().settlement_count("C", 2025).unwrap(), 0);

    let missing = ledger
        .settlements()
        .perform_annual_settlement("nope", &utilities_2025())
        .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);
}

#[test]
fn totals_beyond_i64_cents_are_rejected() {
    let mut ledger = build();
    let huge = dec!(50000000000000000);

    let err = ledger
        .settlements()
        .perform_annual_settlement(
            "C",
            &SettlementRequest {
                charges: vec![
                    ChargeInput::new("water", huge, Decimal::ZERO),
                    ChargeInput::new("heating", huge, Decimal::ZERO),
                ],
                ..utilities_2025()
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation, "{err}");
    assert_eq!(ledger.store.sql().settlement_count("C", 2025).unwrap(), 0);

    let created = ledger
        .settlements()
        .perform_annual_settlement(
            "C",
            &SettlementRequest {
                charges: vec![ChargeInput::new("water", Decimal::ZERO, huge)],
                ..utilities_2025()
            },
        )
        .unwrap();
    let id = created.settlement.settlement_id;
    let err = ledger
        .settlements()
        .amend_settlement(&id, &ChargeInput::new("heating", Decimal::ZERO, huge))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation, "{err}");
    assert_eq!(ledger.settlements().adjustments(&id).unwrap().len(), 1);
    assert_eq!(ledger.settlements().get_settlement(&id).unwrap().total_actual_cost, huge);
}

// ─────────────────────────────────────────────────────────────────────────────
// Deposit deductions
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn deposit_deductions_land_with_the_settlement() {
    let mut ledger = build();
    let deposit = ledger
        .deposits()
        .create_or_update_deposit("C", dec!(2400), date(2024, 1, 1), None)
        .unwrap();

    let request = SettlementRequest {
        deposit_deductions: vec![DepositDeductionInput {
            deduction_type: "charges_balance".into(),
            amount: dec!(70),
        }],
        ..utilities_2025()
    };
    let outcome = ledger
        .settlements()
        .perform_annual_settlement("C", &request)
        .unwrap();

    assert_eq!(outcome.deposit_movements.len(), 1);
    let movement = &outcome.deposit_movements[0];
    assert_eq!(movement.amount, dec!(70));
    assert_eq!(
        movement.settlement_id.as_deref(),
        Some(outcome.settlement.settlement_id.as_str())
    );

    let after = ledger.deposits().get_deposit(&deposit.deposit_id).unwrap();
    assert_eq!(after.current_balance, dec!(2330));
    assert_eq!(after.status, DepositStatus::Partial);

    // Settlement deductions are not tenancy deductions: the lease-end
    // statement still journals its own lines in full.
    let returned = ledger
        .deposits()
        .return_deposit(
            &deposit.deposit_id,
            &leaseledger_core::deposit_ledger::ReturnRequest {
                return_date: date(2026, 7, 1),
                deductions: vec![leaseledger_core::deposit_ledger::Deduction::new(
                    "cleaning",
                    dec!(70),
                )],
                method: Some("cheque".into()),
                notes: None,
            },
        )
        .unwrap();
    assert_eq!(returned.refund_amount, dec!(2260));
    assert_eq!(returned.deductions.len(), 1);
}

#[test]
fn deductions_without_a_deposit_abort_the_settlement() {
    let mut ledger = build();
    let request = SettlementRequest {
        deposit_deductions: vec![DepositDeductionInput {
            deduction_type: "charges_balance".into(),
            amount: dec!(70),
        }],
        ..utilities_2025()
    };
    let err = ledger
        .settlements()
        .perform_annual_settlement("C", &request)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(ledger.store.sql().settlement_count("C", 2025).unwrap(), 0);
}

#[test]
fn deduction_beyond_deposit_balance_rolls_back_everything() {
    let mut ledger = build();
    let deposit = ledger
        .deposits()
        .create_or_update_deposit("C", dec!(50), date(2024, 1, 1), None)
        .unwrap();
    let request = SettlementRequest {
        deposit_deductions: vec![
            DepositDeductionInput {
                deduction_type: "water".into(),
                amount: dec!(30),
            },
            DepositDeductionInput {
                deduction_type: "electricity".into(),
                amount: dec!(40),
            },
        ],
        ..utilities_2025()
    };
    let err = ledger
        .settlements()
        .perform_annual_settlement("C", &request)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let sql = ledger.store.sql();
    assert_eq!(sql.settlement_count("C", 2025).unwrap(), 0);
    assert_eq!(sql.movement_count(&deposit.deposit_id).unwrap(), 0);
    let untouched = sql.get_deposit(&deposit.deposit_id).unwrap().unwrap();
    assert_eq!(untouched.current_balance, dec!(50));
}

// ─────────────────────────────────────────────────────────────────────────────
// Approval and amendment
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn approval_is_terminal_and_never_overwritten() {
    let mut ledger = build();
    let created = ledger
        .settlements()
        .perform_annual_settlement("C", &utilities_2025())
        .unwrap();
    let id = created.settlement.settlement_id;

    let approved = ledger
        .settlements()
        .approve_settlement(&id, &approval("manager-a"))
        .unwrap();
    assert_eq!(approved.status, SettlementStatus::Approved);
    assert_eq!(approved.approved_by.as_deref(), Some("manager-a"));
    assert_eq!(approved.approval_date, Some(date(2026, 1, 20)));

    let second = ApprovalRequest {
        approved_by: "manager-b".into(),
        approval_date: Some(date(2026, 2, 1)),
        notes: Some("second look".into()),
    };
    let err = ledger
        .settlements()
        .approve_settlement(&id, &second)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let stored = ledger.settlements().get_settlement(&id).unwrap();
    assert_eq!(stored.approved_by.as_deref(), Some("manager-a"));
    assert_eq!(stored.approval_date, Some(date(2026, 1, 20)));
    assert_eq!(stored.notes, None);
}

#[test]
fn approval_requires_an_approver_and_a_settlement() {
    let mut ledger = build();
    let err = ledger
        .settlements()
        .approve_settlement("missing", &approval("manager"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = ledger
        .settlements()
        .approve_settlement("missing", &approval("   "))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn amendment_recomputes_totals_until_approval() {
    let mut ledger = build();
    let created = ledger
        .settlements()
        .perform_annual_settlement("C", &utilities_2025())
        .unwrap();
    let id = created.settlement.settlement_id;

    let amended = ledger
        .settlements()
        .amend_settlement(&id, &ChargeInput::new("gas", dec!(300), dec!(180)))
        .unwrap();
    assert_eq!(amended.adjustments.len(), 3);
    assert_eq!(amended.settlement.total_provisioning_paid, dec!(660));
    assert_eq!(amended.settlement.total_actual_cost, dec!(610));
    assert_eq!(amended.settlement.balance, dec!(-50));
    assert_eq!(amended.settlement.status, SettlementStatus::RefundDue);

    let dup = ledger
        .settlements()
        .amend_settlement(&id, &ChargeInput::new("gas", dec!(1), dec!(1)))
        .unwrap_err();
    assert_eq!(dup.kind(), ErrorKind::Conflict);

    ledger
        .settlements()
        .approve_settlement(&id, &approval("manager"))
        .unwrap();
    let late = ledger
        .settlements()
        .amend_settlement(&id, &ChargeInput::new("internet", dec!(10), dec!(20)))
        .unwrap_err();
    assert_eq!(late.kind(), ErrorKind::Conflict);
    assert_eq!(ledger.settlements().adjustments(&id).unwrap().len(), 3);
}

#[test]
fn approved_settlement_refuses_adjustments_at_the_schema_level() {
    let mut ledger = build();
    let created = ledger
        .settlements()
        .perform_annual_settlement("C", &utilities_2025())
        .unwrap();
    let id = created.settlement.settlement_id;
    ledger
        .settlements()
        .approve_settlement(&id, &approval("manager"))
        .unwrap();

    let result = ledger.store.raw().execute(
        "INSERT INTO charge_adjustment
            (adjustment_id, settlement_id, charge_type, provisioning_paid, actual_cost, balance, created_at)
         VALUES ('x', ?1, 'gas', 0, 0, 0, '2026-01-01T00:00:00Z')",
        [&id],
    );
    assert!(result.is_err(), "trigger must refuse the insert");
}

// ─────────────────────────────────────────────────────────────────────────────
// Reads
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn report_joins_contract_and_adjustments() {
    let mut ledger = build();
    ledger
        .settlements()
        .perform_annual_settlement("C", &utilities_2025())
        .unwrap();

    let report = ledger.settlements().get_settlement_report("C", 2025).unwrap();
    assert_eq!(report.contract.contract_number, "2024-017");
    assert_eq!(report.summary.balance, dec!(70));
    assert_eq!(report.summary.balance_due_to_owner, dec!(70));
    assert_eq!(report.summary.balance_due_to_tenant, Decimal::ZERO);
    let types: Vec<&str> = report
        .charges_breakdown
        .iter()
        .map(|c| c.charge_type.as_str())
        .collect();
    assert_eq!(types, vec!["electricity", "water"]);

    let err = ledger
        .settlements()
        .get_settlement_report("C", 2024)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn list_settlements_filters_and_orders_by_year() {
    let mut ledger = build();
    for year in [2024, 2025] {
        let request = SettlementRequest {
            settlement_year: year,
            ..utilities_2025()
        };
        ledger
            .settlements()
            .perform_annual_settlement("C", &request)
            .unwrap();
    }
    let newest = ledger
        .settlements()
        .list_settlements("C", &SettlementFilters::default())
        .unwrap();
    let years: Vec<i32> = newest.iter().map(|s| s.settlement_year).collect();
    assert_eq!(years, vec![2025, 2024]);

    let id = newest[1].settlement_id.clone();
    ledger
        .settlements()
        .approve_settlement(&id, &approval("manager"))
        .unwrap();
    let approved = ledger
        .settlements()
        .list_settlements(
            "C",
            &SettlementFilters {
                status: Some(SettlementStatus::Approved),
                year: None,
            },
        )
        .unwrap();
    assert_eq!(approved.len(), 1);
    assert_eq!(approved[0].settlement_year, 2024);

    let err = ledger
        .settlements()
        .list_settlements("nope", &SettlementFilters::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn provisioning_plan_runs_to_contract_end_without_writing() {
    let mut ledger = build();
    let audits_before = ledger.store.sql().audit_count().unwrap();

    let plan = ledger
        .settlements()
        .calculate_provisioning(
            "C",
            &ProvisioningRequest {
                charge_type: "water".into(),
                monthly_amount: dec!(25),
                start_date: date(2026, 1, 1),
                annual_estimated: None,
            },
        )
        .unwrap();

    assert_eq!(plan.end_date, date(2026, 7, 1));
    assert_eq!(plan.schedule.len(), 6);
    assert_eq!(plan.total_provisioning, dec!(150));
    assert_eq!(plan.annual_estimated, dec!(300));
    assert_eq!(plan.schedule[1].days_in_month, 28);
    assert_eq!(ledger.store.sql().audit_count().unwrap(), audits_before);

    let err = ledger
        .settlements()
        .calculate_provisioning(
            "C",
            &ProvisioningRequest {
                charge_type: "water".into(),
                monthly_amount: dec!(-1),
                start_date: date(2026, 1, 1),
                annual_estimated: None,
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn provisioning_estimate_beyond_i64_cents_is_rejected() {
    let mut ledger = build();
    let err = ledger
        .settlements()
        .calculate_provisioning(
            "C",
            &ProvisioningRequest {
                charge_type: "water".into(),
                monthly_amount: dec!(10000000000000000),
                start_date: date(2026, 1, 1),
                annual_estimated: None,
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation, "{err}");
}

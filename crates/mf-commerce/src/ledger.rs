//! Independent-agent spend accounting.
//!
//! Pure mutations over [`AgentAccount`]; the pay transaction applies
//! them and persists the account together with the order so the debit
//! and the order are atomic.

use chrono::{DateTime, Utc};

use mf_core::DomainError;

use crate::types::{day_key, AgentAccount, AgentAccountStatus};

/// Key under which a category's cap lives in the spend map.
fn cap_key(category: &str) -> String {
    format!("cap:{category}")
}

/// Roll the daily counters when the UTC day changed.
pub fn roll_day(account: &mut AgentAccount, now: DateTime<Utc>) {
    let today = day_key(now);
    if account.spend_day_key != today {
        account.spend_day_key = today;
        account.spent_today_cents = 0;
        let caps: Vec<(String, i64)> = account
            .spent_by_category_cents
            .iter()
            .filter(|(k, _)| k.starts_with("cap:"))
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        account.spent_by_category_cents = caps.into_iter().collect();
    }
}

/// Debit a spend against the account, enforcing hold/prepay/cap rules.
pub fn apply_spend(
    account: &mut AgentAccount,
    amount_cents: i64,
    category: &str,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    roll_day(account, now);

    if account.status == AgentAccountStatus::OnHold {
        return Err(DomainError::forbidden(
            "ACCOUNT_ON_HOLD",
            "the agent account is on hold",
        ));
    }
    if account.prepaid_balance_cents < amount_cents {
        return Err(DomainError::precondition(
            "INSUFFICIENT_PREPAID_BALANCE",
            "prepaid balance does not cover this order",
        ));
    }
    if let Some(cap) = account.daily_spend_cap_cents {
        if account.spent_today_cents + amount_cents > cap {
            return Err(DomainError::precondition(
                "DAILY_SPEND_CAP_EXCEEDED",
                "this order would exceed the daily spend cap",
            ));
        }
    }
    let category_spent = account
        .spent_by_category_cents
        .get(category)
        .copied()
        .unwrap_or(0);
    if let Some(category_cap) = account.spent_by_category_cents.get(&cap_key(category)) {
        if category_spent + amount_cents > *category_cap {
            return Err(DomainError::precondition(
                "CATEGORY_SPEND_CAP_EXCEEDED",
                format!("this order would exceed the `{category}` category cap"),
            ));
        }
    }

    account.prepaid_balance_cents -= amount_cents;
    account.spent_today_cents += amount_cents;
    account
        .spent_by_category_cents
        .insert(category.to_string(), category_spent + amount_cents);
    Ok(())
}

/// Set (or clear) a per-category cap.
pub fn set_category_cap(account: &mut AgentAccount, category: &str, cap_cents: Option<i64>) {
    let key = cap_key(category);
    match cap_cents {
        Some(cap) => {
            account.spent_by_category_cents.insert(key, cap.max(0));
        }
        None => {
            account.spent_by_category_cents.remove(&key);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn funded_account(balance: i64) -> AgentAccount {
        let mut account = AgentAccount::fresh("c1", Utc::now());
        account.independent_enabled = true;
        account.prepaid_balance_cents = balance;
        account
    }

    #[test]
    fn spend_debits_balance_and_counters() {
        let mut account = funded_account(10_000);
        apply_spend(&mut account, 1_800, "firing", Utc::now()).unwrap();
        assert_eq!(account.prepaid_balance_cents, 8_200);
        assert_eq!(account.spent_today_cents, 1_800);
        assert_eq!(account.spent_by_category_cents["firing"], 1_800);
    }

    #[test]
    fn insufficient_balance_is_denied() {
        let mut account = funded_account(1_000);
        let err = apply_spend(&mut account, 1_800, "firing", Utc::now()).unwrap_err();
        assert_eq!(err.reason(), Some("INSUFFICIENT_PREPAID_BALANCE"));
        assert_eq!(account.prepaid_balance_cents, 1_000);
    }

    #[test]
    fn on_hold_account_is_denied() {
        let mut account = funded_account(10_000);
        account.status = AgentAccountStatus::OnHold;
        let err = apply_spend(&mut account, 100, "firing", Utc::now()).unwrap_err();
        assert_eq!(err.reason(), Some("ACCOUNT_ON_HOLD"));
    }

    #[test]
    fn daily_cap_is_enforced() {
        let mut account = funded_account(100_000);
        account.daily_spend_cap_cents = Some(2_000);
        apply_spend(&mut account, 1_500, "firing", Utc::now()).unwrap();
        let err = apply_spend(&mut account, 1_000, "firing", Utc::now()).unwrap_err();
        assert_eq!(err.reason(), Some("DAILY_SPEND_CAP_EXCEEDED"));
    }

    #[test]
    fn category_cap_is_enforced() {
        let mut account = funded_account(100_000);
        set_category_cap(&mut account, "firing", Some(2_000));
        apply_spend(&mut account, 1_800, "firing", Utc::now()).unwrap();
        let err = apply_spend(&mut account, 500, "firing", Utc::now()).unwrap_err();
        assert_eq!(err.reason(), Some("CATEGORY_SPEND_CAP_EXCEEDED"));
        // Other categories are unaffected.
        apply_spend(&mut account, 500, "materials", Utc::now()).unwrap();
    }

    #[test]
    fn day_rollover_resets_spend_but_keeps_caps() {
        let mut account = funded_account(100_000);
        set_category_cap(&mut account, "firing", Some(5_000));
        apply_spend(&mut account, 2_000, "firing", Utc::now()).unwrap();

        account.spend_day_key = "2000-01-01".to_string();
        roll_day(&mut account, Utc::now());
        assert_eq!(account.spent_today_cents, 0);
        assert!(account.spent_by_category_cents.contains_key("cap:firing"));
        assert!(!account.spent_by_category_cents.contains_key("firing"));
    }
}

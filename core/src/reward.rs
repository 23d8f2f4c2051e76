//! Daily reward calculation.
//!
//! Pure: no I/O, no clock. The reward is always clamped so an enrollment
//! never accumulates past its plan's target.

use crate::store::{Enrollment, SubscriptionPlan};
use rust_decimal::Decimal;

/// The amount to credit `enrollment` today, or `None` when nothing is owed
/// or the remaining amount is not representable.
///
/// Returns a strictly positive amount such that
/// `enrollment.current_amount + reward <= plan.target_amount`.
pub fn compute_reward(plan: &SubscriptionPlan, enrollment: &Enrollment) -> Option<Decimal> {
    let remaining = plan.target_amount.checked_sub(enrollment.current_amount)?;
    if remaining <= Decimal::ZERO || plan.reward_increment <= Decimal::ZERO {
        return None;
    }
    Some(plan.reward_increment.min(remaining))
}

// Condition evaluation
//
// Total over the declared condition set. `between` is inclusive on both
// ends. The observed-null policy lives in `normalize_measurement`: a NULL
// measurement fails the leaf, except for completeness checks where NULL
// from an empty table reads as zero nulls.

use crate::models::{CheckType, Condition, Threshold};
use crate::utils::{WeiserError, WeiserResult};

/// Apply `condition` with `threshold` to a measured value.
pub fn evaluate(condition: Condition, threshold: &Threshold, value: f64) -> WeiserResult<bool> {
    match condition {
        Condition::Between => {
            let (lo, hi) = threshold.range().ok_or_else(|| {
                WeiserError::config("between condition requires a [lo, hi] threshold pair")
            })?;
            Ok(lo <= value && value <= hi)
        },
        _ => {
            let bound = threshold.value().ok_or_else(|| {
                WeiserError::config(format!(
                    "condition '{}' requires a scalar threshold",
                    condition.as_str()
                ))
            })?;
            Ok(match condition {
                Condition::Gt => value > bound,
                Condition::Ge => value >= bound,
                Condition::Lt => value < bound,
                Condition::Le => value <= bound,
                Condition::Eq => value == bound,
                Condition::Neq => value != bound,
                Condition::Between => unreachable!(),
            })
        },
    }
}

/// Observed-null policy: completeness checks read NULL (empty table) as 0;
/// every other type keeps the NULL and the caller records a failure.
pub fn normalize_measurement(check_type: CheckType, raw: Option<f64>) -> Option<f64> {
    match raw {
        Some(v) => Some(v),
        None if check_type.is_completeness() => Some(0.0),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unary_conditions() {
        let t = Threshold::Value(10.0);
        assert!(evaluate(Condition::Gt, &t, 11.0).unwrap());
        assert!(!evaluate(Condition::Gt, &t, 10.0).unwrap());
        assert!(evaluate(Condition::Ge, &t, 10.0).unwrap());
        assert!(evaluate(Condition::Lt, &t, 9.0).unwrap());
        assert!(evaluate(Condition::Le, &t, 10.0).unwrap());
        assert!(evaluate(Condition::Eq, &t, 10.0).unwrap());
        assert!(evaluate(Condition::Neq, &t, 10.5).unwrap());
    }

    #[test]
    fn test_between_inclusive_on_both_ends() {
        let t = Threshold::Range(vec![1000.0, 2000.0]);
        assert!(evaluate(Condition::Between, &t, 1000.0).unwrap());
        assert!(evaluate(Condition::Between, &t, 1500.0).unwrap());
        assert!(evaluate(Condition::Between, &t, 2000.0).unwrap());
        assert!(!evaluate(Condition::Between, &t, 999.99).unwrap());
        assert!(!evaluate(Condition::Between, &t, 2000.01).unwrap());
    }

    #[test]
    fn test_between_requires_pair() {
        let err = evaluate(Condition::Between, &Threshold::Value(1.0), 0.5).unwrap_err();
        assert!(err.to_string().contains("pair"));
    }

    #[test]
    fn test_scalar_condition_rejects_pair() {
        let err =
            evaluate(Condition::Gt, &Threshold::Range(vec![0.0, 1.0]), 0.5).unwrap_err();
        assert!(err.to_string().contains("scalar"));
    }

    #[test]
    fn test_null_policy() {
        assert_eq!(normalize_measurement(CheckType::NotEmpty, None), Some(0.0));
        assert_eq!(normalize_measurement(CheckType::NotEmptyPct, None), Some(0.0));
        assert_eq!(normalize_measurement(CheckType::RowCount, None), None);
        assert_eq!(
            normalize_measurement(CheckType::Sum, Some(5.0)),
            Some(5.0)
        );
    }
}

//! Quota and config-health predicates. Pure, no side effects.

use crate::error::{ConfigError, FractalError};
use crate::snapshot::Collection;

/// Fails with `LimitExceeded` once `current` has reached `max`.
pub fn check_create_allowed(current: usize, max: usize) -> Result<(), FractalError> {
    if current >= max {
        return Err(FractalError::LimitExceeded { current, max });
    }
    Ok(())
}

/// Fails with `CorruptionSuspected` when `collection` holds fewer entries
/// than the known-minimum baseline.
pub fn check_config_healthy(
    collection: Collection,
    current: usize,
    min_floor: usize,
) -> Result<(), ConfigError> {
    if current < min_floor {
        return Err(ConfigError::CorruptionSuspected {
            collection,
            observed: current,
            floor: min_floor,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 2, true)]
    #[case(1, 2, true)]
    #[case(2, 2, false)]
    #[case(3, 2, false)]
    #[case(0, 0, false)]
    fn create_allowed_below_max(#[case] current: usize, #[case] max: usize, #[case] ok: bool) {
        assert_eq!(check_create_allowed(current, max).is_ok(), ok);
    }

    #[rstest]
    #[case(5, 5, true)]
    #[case(6, 5, true)]
    #[case(4, 5, false)]
    #[case(0, 0, true)]
    fn healthy_at_or_above_floor(#[case] current: usize, #[case] floor: usize, #[case] ok: bool) {
        assert_eq!(check_config_healthy(Collection::Agents, current, floor).is_ok(), ok);
    }
}

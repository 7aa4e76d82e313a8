//! Per-reviewer tuning knobs.
//!
//! All durations are whole minutes. Each numeric knob has a declared range
//! (and step, where the original UI stepped through values); the command
//! surface validates against these before writing.

use sqlx::FromRow;

use crate::error::AppError;

/// Allowed values for the cleanup duration knob.
pub const CLEANUP_CHOICES: [i64; 4] = [15, 30, 45, 60];

/// Settings row, one per reviewer, created with defaults on registration.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct UserSettings {
    pub reviewer_login: String,

    /// Decision deadline = review start minus this many minutes.
    pub response_deadline_shift_minutes: i64,

    /// How long a non-whitelisted review waits before auto-cancel.
    pub non_whitelist_cancel_delay_minutes: i64,

    /// Send a chat message when a prompt times out.
    pub notify_whitelist_timeout: bool,

    /// Send a chat message when a non-whitelisted slot is cancelled.
    pub notify_non_whitelist_cancel: bool,

    /// Slots starting within this many minutes are acted on (shift or ask).
    pub slot_shift_threshold_minutes: i64,

    /// How many minutes earlier a whitelisted slot is moved.
    pub slot_shift_duration_minutes: i64,

    /// Slots no longer than this are cancelled instead of shifted.
    pub cleanup_durations_minutes: i64,
}

impl UserSettings {
    /// Defaults applied when a reviewer registers.
    pub fn defaults(reviewer_login: impl Into<String>) -> Self {
        Self {
            reviewer_login: reviewer_login.into(),
            response_deadline_shift_minutes: 20,
            non_whitelist_cancel_delay_minutes: 5,
            notify_whitelist_timeout: true,
            notify_non_whitelist_cancel: true,
            slot_shift_threshold_minutes: 25,
            slot_shift_duration_minutes: 15,
            cleanup_durations_minutes: 15,
        }
    }
}

/// One tunable setting: its column, its constraint, and its validator.
///
/// Keeping the key closed means the update query can interpolate the column
/// name from a match instead of trusting caller input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    ResponseDeadlineShift,
    NonWhitelistCancelDelay,
    NotifyWhitelistTimeout,
    NotifyNonWhitelistCancel,
    SlotShiftThreshold,
    SlotShiftDuration,
    CleanupDurations,
}

/// Constraint on a numeric setting value.
#[derive(Debug, Clone, Copy)]
pub enum SettingConstraint {
    /// Inclusive range with a step; valid values are `min, min+step, .., max`.
    Range { min: i64, max: i64, step: i64 },
    /// Closed set of allowed values.
    Choices(&'static [i64]),
    /// Boolean knob.
    Bool,
}

impl SettingKey {
    /// Column in the `user_settings` table.
    pub fn column(&self) -> &'static str {
        match self {
            Self::ResponseDeadlineShift => "response_deadline_shift_minutes",
            Self::NonWhitelistCancelDelay => "non_whitelist_cancel_delay_minutes",
            Self::NotifyWhitelistTimeout => "notify_whitelist_timeout",
            Self::NotifyNonWhitelistCancel => "notify_non_whitelist_cancel",
            Self::SlotShiftThreshold => "slot_shift_threshold_minutes",
            Self::SlotShiftDuration => "slot_shift_duration_minutes",
            Self::CleanupDurations => "cleanup_durations_minutes",
        }
    }

    pub fn constraint(&self) -> SettingConstraint {
        match self {
            Self::ResponseDeadlineShift => SettingConstraint::Range {
                min: 1,
                max: 60,
                step: 1,
            },
            Self::NonWhitelistCancelDelay => SettingConstraint::Range {
                min: 1,
                max: 10,
                step: 1,
            },
            Self::SlotShiftThreshold => SettingConstraint::Range {
                min: 5,
                max: 60,
                step: 5,
            },
            Self::SlotShiftDuration => SettingConstraint::Range {
                min: 15,
                max: 60,
                step: 15,
            },
            Self::CleanupDurations => SettingConstraint::Choices(&CLEANUP_CHOICES),
            Self::NotifyWhitelistTimeout | Self::NotifyNonWhitelistCancel => {
                SettingConstraint::Bool
            }
        }
    }

    /// Human-readable description of the allowed values, used in replies.
    pub fn allowed_values(&self) -> String {
        match self.constraint() {
            SettingConstraint::Range { min, max, step } if step == 1 => {
                format!("{} - {}", min, max)
            }
            SettingConstraint::Range { min, max, step } => {
                format!("{} - {} (step {})", min, max, step)
            }
            SettingConstraint::Choices(values) => values
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            SettingConstraint::Bool => "true, false".to_string(),
        }
    }

    /// Validate a numeric value against this key's constraint.
    pub fn validate(&self, value: i64) -> Result<(), AppError> {
        let ok = match self.constraint() {
            SettingConstraint::Range { min, max, step } => {
                value >= min && value <= max && (value - min) % step == 0
            }
            SettingConstraint::Choices(values) => values.contains(&value),
            SettingConstraint::Bool => value == 0 || value == 1,
        };

        if ok {
            Ok(())
        } else {
            Err(AppError::invalid_input_for(
                format!("allowed values: {}", self.allowed_values()),
                self.column(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_declared_values() {
        let s = UserSettings::defaults("alice");
        assert_eq!(s.response_deadline_shift_minutes, 20);
        assert_eq!(s.non_whitelist_cancel_delay_minutes, 5);
        assert!(s.notify_whitelist_timeout);
        assert!(s.notify_non_whitelist_cancel);
        assert_eq!(s.slot_shift_threshold_minutes, 25);
        assert_eq!(s.slot_shift_duration_minutes, 15);
        assert_eq!(s.cleanup_durations_minutes, 15);
    }

    #[test]
    fn range_validation_at_bounds() {
        let key = SettingKey::ResponseDeadlineShift;
        assert!(key.validate(1).is_ok());
        assert!(key.validate(60).is_ok());
        assert!(key.validate(0).is_err());
        assert!(key.validate(61).is_err());
    }

    #[test]
    fn stepped_range_rejects_off_step_values() {
        let key = SettingKey::SlotShiftThreshold;
        assert!(key.validate(5).is_ok());
        assert!(key.validate(25).is_ok());
        assert!(key.validate(60).is_ok());
        assert!(key.validate(27).is_err());
        assert!(key.validate(0).is_err());
        assert!(key.validate(65).is_err());

        let key = SettingKey::SlotShiftDuration;
        assert!(key.validate(15).is_ok());
        assert!(key.validate(45).is_ok());
        assert!(key.validate(20).is_err());
    }

    #[test]
    fn cleanup_is_a_closed_set() {
        let key = SettingKey::CleanupDurations;
        for v in CLEANUP_CHOICES {
            assert!(key.validate(v).is_ok());
        }
        assert!(key.validate(20).is_err());
        assert!(key.validate(0).is_err());
    }

    #[test]
    fn allowed_values_rendering() {
        assert_eq!(SettingKey::NonWhitelistCancelDelay.allowed_values(), "1 - 10");
        assert_eq!(
            SettingKey::SlotShiftThreshold.allowed_values(),
            "5 - 60 (step 5)"
        );
        assert_eq!(SettingKey::CleanupDurations.allowed_values(), "15, 30, 45, 60");
    }
}

//! SM-2 spaced repetition scheduling.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::cards_model::{Card, CardUpdate, MAX_INTERVAL_DAYS, MIN_EASE_FACTOR};
use crate::errors::ValidationError;

/// How well the user recalled a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewGrade {
    Again,
    Hard,
    Good,
    Easy,
}

impl ReviewGrade {
    /// SM-2 response quality (0-5).
    pub fn quality(&self) -> u8 {
        match self {
            Self::Again => 1,
            Self::Hard => 3,
            Self::Good => 4,
            Self::Easy => 5,
        }
    }
}

/// Compute the scheduling fields after reviewing `card` at `now`.
///
/// Intervals are capped at [`MAX_INTERVAL_DAYS`].
pub fn schedule_review(
    card: &Card,
    grade: ReviewGrade,
    now: DateTime<Utc>,
) -> Result<CardUpdate, ValidationError> {
    let quality = f64::from(grade.quality());

    let (repetitions, interval) = if grade.quality() < 3 {
        (0, 1)
    } else {
        let repetitions = card.repetitions.saturating_add(1);
        let interval = match repetitions {
            1 => 1,
            2 => 6,
            _ => {
                let next = (f64::from(card.interval.max(1)) * card.ease_factor).round();
                if next.is_finite() {
                    next.clamp(1.0, f64::from(MAX_INTERVAL_DAYS)) as u32
                } else {
                    MAX_INTERVAL_DAYS
                }
            }
        };
        (repetitions, interval)
    };

    let penalty = 5.0 - quality;
    let ease_factor =
        (card.ease_factor + (0.1 - penalty * (0.08 + penalty * 0.02))).max(MIN_EASE_FACTOR);

    let next_review_date = now
        .checked_add_signed(Duration::days(i64::from(interval)))
        .ok_or_else(|| ValidationError::OutOfRange {
            field: "nextReviewDate",
            message: format!("is out of range {} day(s) after {}", interval, now),
        })?;

    Ok(CardUpdate {
        ease_factor: Some(ease_factor),
        interval: Some(interval),
        repetitions: Some(repetitions),
        next_review_date: Some(Some(next_review_date)),
        last_studied_at: Some(Some(now)),
        ..Default::default()
    })
}

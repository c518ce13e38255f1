use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::ProtoResult;

/// One habit as shown on the wearable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub is_completed_today: bool,
    #[serde(default)]
    pub current_streak: u32,
    /// Target completions per week.
    #[serde(default)]
    pub target_frequency: u32,
    #[serde(default)]
    pub completions_this_week: u32,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

impl HabitSummary {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            emoji: None,
            is_completed_today: false,
            current_streak: 0,
            target_frequency: 0,
            completions_this_week: 0,
            category: None,
            color: None,
        }
    }
}

/// Overall streak and gamification counters used when assembling a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreakStats {
    pub current_streak: u32,
    pub best_streak: u32,
    pub streak_last_activity: Option<i64>,
    pub total_points: u64,
    pub current_level: u32,
    pub sync_version: u64,
}

/// Full habit/streak/progress snapshot synchronised from phone to wearable.
///
/// The phone is the source of truth. The wearable holds exactly one instance,
/// replaces it on every inbound push and derives copies for optimistic
/// toggles via [`CompanionData::with_habit_completion`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanionData {
    pub habits: Vec<HabitSummary>,
    #[serde(default)]
    pub current_streak: u32,
    #[serde(default)]
    pub best_streak: u32,
    #[serde(default)]
    pub streak_last_activity: Option<i64>,
    #[serde(default)]
    pub today_completed_habits: u32,
    #[serde(default)]
    pub today_total_habits: u32,
    #[serde(default)]
    pub today_progress: f64,
    #[serde(default)]
    pub pending_habit_ids: Vec<String>,
    #[serde(default)]
    pub weekly_progress: f64,
    #[serde(default)]
    pub total_points: u64,
    #[serde(default)]
    pub current_level: u32,
    #[serde(default)]
    pub last_updated: i64,
    #[serde(default)]
    pub sync_version: u64,
}

impl CompanionData {
    /// Zero habits, zero progress. Used when nothing usable is cached.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a snapshot from the phone's habit list, deriving every
    /// denormalised counter.
    pub fn assemble(habits: Vec<HabitSummary>, stats: StreakStats, now: i64) -> Self {
        let mut data = Self {
            habits,
            current_streak: stats.current_streak,
            best_streak: stats.best_streak.max(stats.current_streak),
            streak_last_activity: stats.streak_last_activity,
            total_points: stats.total_points,
            current_level: stats.current_level,
            last_updated: now,
            sync_version: stats.sync_version,
            ..Self::default()
        };
        data.recompute_today();
        data.weekly_progress = weekly_progress(&data.habits);
        data
    }

    pub fn habit(&self, id: &str) -> Option<&HabitSummary> {
        self.habits.iter().find(|habit| habit.id == id)
    }

    pub fn pending_habits(&self) -> impl Iterator<Item = &HabitSummary> {
        self.habits.iter().filter(|habit| !habit.is_completed_today)
    }

    pub fn completed_habits(&self) -> impl Iterator<Item = &HabitSummary> {
        self.habits.iter().filter(|habit| habit.is_completed_today)
    }

    pub fn has_unique_ids(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.habits.len());
        self.habits.iter().all(|habit| seen.insert(habit.id.as_str()))
    }

    /// Completed over total, or 0 when there are no habits.
    pub fn computed_progress(&self) -> f64 {
        let total = self.habits.len();
        if total == 0 {
            return 0.0;
        }
        self.completed_habits().count() as f64 / total as f64
    }

    /// Re-derives the today counters and pending ids from `habits`.
    pub fn recompute_today(&mut self) {
        self.today_completed_habits = self.completed_habits().count() as u32;
        self.today_total_habits = self.habits.len() as u32;
        self.today_progress = self.computed_progress();
        self.pending_habit_ids = self.pending_habits().map(|habit| habit.id.clone()).collect();
    }

    /// Returns a copy with the habit marked completed or not, or `None` when
    /// the id is unknown or the habit is already in the requested state.
    ///
    /// Completing bumps the habit streak by one; uncompleting drops it by one,
    /// never below zero.
    pub fn with_habit_completion(&self, habit_id: &str, completed: bool) -> Option<Self> {
        let index = self.habits.iter().position(|habit| habit.id == habit_id)?;
        if self.habits[index].is_completed_today == completed {
            return None;
        }
        let mut next = self.clone();
        let habit = &mut next.habits[index];
        habit.is_completed_today = completed;
        habit.current_streak = if completed {
            habit.current_streak.saturating_add(1)
        } else {
            habit.current_streak.saturating_sub(1)
        };
        next.recompute_today();
        Some(next)
    }

    /// Orders snapshots by `(syncVersion, lastUpdated)`.
    pub fn is_older_than(&self, other: &CompanionData) -> bool {
        (self.sync_version, self.last_updated) < (other.sync_version, other.last_updated)
    }

    pub fn to_json(&self) -> ProtoResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> ProtoResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_slice(bytes: &[u8]) -> ProtoResult<Self> {
        Self::from_json(std::str::from_utf8(bytes)?)
    }
}

fn weekly_progress(habits: &[HabitSummary]) -> f64 {
    let target: u32 = habits.iter().map(|habit| habit.target_frequency).sum();
    if target == 0 {
        return 0.0;
    }
    let done: u32 = habits
        .iter()
        .map(|habit| habit.completions_this_week.min(habit.target_frequency))
        .sum();
    f64::from(done) / f64::from(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn habit(id: &str, done: bool, streak: u32) -> HabitSummary {
        HabitSummary {
            is_completed_today: done,
            current_streak: streak,
            ..HabitSummary::new(id, id.to_uppercase())
        }
    }

    fn sample() -> CompanionData {
        CompanionData::assemble(
            vec![habit("h1", false, 3), habit("h2", true, 0), habit("h3", false, 1)],
            StreakStats {
                current_streak: 5,
                best_streak: 9,
                ..StreakStats::default()
            },
            1_700_000_000_000,
        )
    }

    #[test]
    fn assemble_derives_today_counters() {
        let data = sample();
        assert_eq!(data.today_completed_habits, 1);
        assert_eq!(data.today_total_habits, 3);
        assert!((data.today_progress - 1.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(data.pending_habit_ids, vec!["h1", "h3"]);
        assert_eq!(data.last_updated, 1_700_000_000_000);
        assert!(data.has_unique_ids());
    }

    #[test]
    fn progress_is_zero_without_habits() {
        let mut data = CompanionData::empty();
        data.recompute_today();
        assert_eq!(data.today_progress, 0.0);
        assert_eq!(data.computed_progress(), 0.0);
        assert_eq!(data.today_total_habits, 0);
    }

    #[test]
    fn weekly_progress_caps_each_habit_at_target() {
        let habits = vec![
            HabitSummary {
                target_frequency: 3,
                completions_this_week: 5,
                ..HabitSummary::new("a", "A")
            },
            HabitSummary {
                target_frequency: 5,
                completions_this_week: 1,
                ..HabitSummary::new("b", "B")
            },
        ];
        let data = CompanionData::assemble(habits, StreakStats::default(), 0);
        assert!((data.weekly_progress - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn completing_bumps_streak_and_progress() {
        let data = sample();
        let next = data.with_habit_completion("h1", true).expect("changed");
        let h1 = next.habit("h1").unwrap();
        assert!(h1.is_completed_today);
        assert_eq!(h1.current_streak, 4);
        assert_eq!(next.today_completed_habits, 2);
        assert_eq!(next.pending_habit_ids, vec!["h3"]);
        assert!((next.today_progress - next.computed_progress()).abs() < f64::EPSILON);
        // original is untouched
        assert!(!data.habit("h1").unwrap().is_completed_today);
    }

    #[test]
    fn uncompleting_floors_streak_at_zero() {
        let data = sample();
        let next = data.with_habit_completion("h2", false).expect("changed");
        assert_eq!(next.habit("h2").unwrap().current_streak, 0);
        assert_eq!(next.today_completed_habits, 0);
    }

    #[test]
    fn complete_then_uncomplete_restores_positive_streak() {
        let data = sample();
        let restored = data
            .with_habit_completion("h3", true)
            .and_then(|next| next.with_habit_completion("h3", false))
            .expect("both toggles apply");
        assert_eq!(restored, data);
    }

    #[test]
    fn unknown_or_unchanged_habit_yields_none() {
        let data = sample();
        assert!(data.with_habit_completion("nope", true).is_none());
        assert!(data.with_habit_completion("h2", true).is_none());
    }

    #[test]
    fn json_uses_camel_case_and_round_trips() {
        let mut data = sample();
        data.habits[0].emoji = Some("📚".into());
        data.streak_last_activity = Some(42);
        let json = data.to_json().expect("serialize");
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["todayCompletedHabits"], 1);
        assert_eq!(value["habits"][0]["isCompletedToday"], false);
        assert_eq!(value["habits"][0]["currentStreak"], 3);
        assert!(value.get("pendingHabitIds").is_some());
        assert!(value.get("syncVersion").is_some());

        let parsed = CompanionData::from_json(&json).expect("parse");
        assert_eq!(parsed, data);
        let ids: Vec<_> = parsed.habits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, ["h1", "h2", "h3"]);
    }

    #[test]
    fn missing_optional_fields_default() {
        let parsed = CompanionData::from_json(
            r#"{"habits":[{"id":"h1","name":"Read"}],"lastUpdated":7}"#,
        )
        .expect("parse");
        assert_eq!(parsed.habits[0].current_streak, 0);
        assert_eq!(parsed.last_updated, 7);
        assert_eq!(parsed.sync_version, 0);
    }

    #[test]
    fn truncated_json_is_an_error() {
        assert!(CompanionData::from_json(r#"{"habits":[{"id":"h1""#).is_err());
        assert!(CompanionData::from_slice(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn ordering_uses_version_then_timestamp() {
        let mut older = sample();
        let mut newer = sample();
        older.sync_version = 1;
        newer.sync_version = 1;
        newer.last_updated = older.last_updated + 1;
        assert!(older.is_older_than(&newer));
        assert!(!newer.is_older_than(&older));
        older.sync_version = 2;
        assert!(newer.is_older_than(&older));
    }

    #[test]
    fn progress_ratios_survive_json() {
        for total in 1..=200u32 {
            let habits: Vec<_> = (0..total).map(|i| habit(&format!("h{i}"), false, 0)).collect();
            let mut data = CompanionData::assemble(habits, StreakStats::default(), 0);
            for done in 0..=total {
                if done > 0 {
                    data.habits[done as usize - 1].is_completed_today = true;
                    data.recompute_today();
                }
                data.weekly_progress = f64::from(done) / f64::from(total);
                let parsed = CompanionData::from_json(&data.to_json().unwrap()).unwrap();
                assert_eq!(parsed, data, "{done}/{total}");
                assert_eq!(parsed.today_progress, parsed.computed_progress());
            }
        }
    }

    mod props {
        use proptest::prelude::*;

        use super::super::*;

        fn habits_strategy() -> impl Strategy<Value = Vec<HabitSummary>> {
            prop::collection::vec(
                (
                    any::<bool>(),
                    0u32..10_000,
                    0u32..8,
                    0u32..8,
                    prop::option::of("\\PC{0,8}"),
                ),
                0..40,
            )
            .prop_map(|rows| {
                rows.into_iter()
                    .enumerate()
                    .map(|(i, (done, streak, target, week, emoji))| HabitSummary {
                        emoji,
                        is_completed_today: done,
                        current_streak: streak,
                        target_frequency: target,
                        completions_this_week: week,
                        ..HabitSummary::new(format!("h{i}"), format!("Habit {i}"))
                    })
                    .collect()
            })
        }

        fn snapshot_strategy() -> impl Strategy<Value = CompanionData> {
            (
                habits_strategy(),
                0u32..10_000,
                prop::option::of(any::<i64>()),
                any::<u64>(),
                any::<i64>(),
                any::<u64>(),
                0.0f64..=1.0,
            )
                .prop_map(|(habits, streak, activity, points, now, version, weekly)| {
                    let mut data = CompanionData::assemble(
                        habits,
                        StreakStats {
                            current_streak: streak,
                            best_streak: streak,
                            streak_last_activity: activity,
                            total_points: points,
                            current_level: streak / 100,
                            sync_version: version,
                        },
                        now,
                    );
                    data.weekly_progress = weekly;
                    data
                })
        }

        proptest! {
            #[test]
            fn json_round_trip_is_lossless(data in snapshot_strategy()) {
                let parsed = CompanionData::from_json(&data.to_json().unwrap()).unwrap();
                prop_assert_eq!(parsed, data);
            }

            #[test]
            fn recompute_matches_habit_flags(
                mut data in snapshot_strategy(),
                flips in prop::collection::vec(any::<bool>(), 0..40),
            ) {
                for (habit, flip) in data.habits.iter_mut().zip(flips) {
                    habit.is_completed_today ^= flip;
                }
                data.recompute_today();
                prop_assert_eq!(data.today_progress, data.computed_progress());
                prop_assert_eq!(data.today_total_habits as usize, data.habits.len());
                prop_assert_eq!(
                    data.today_completed_habits as usize + data.pending_habit_ids.len(),
                    data.habits.len()
                );
                prop_assert!((0.0..=1.0).contains(&data.today_progress));
            }

            #[test]
            fn toggle_pairs_restore_state(data in snapshot_strategy(), pick in any::<prop::sample::Index>()) {
                prop_assume!(!data.habits.is_empty());
                let target = &data.habits[pick.index(data.habits.len())];
                let id = target.id.clone();
                let restored = if target.is_completed_today {
                    prop_assume!(target.current_streak > 0);
                    data.with_habit_completion(&id, false)
                        .and_then(|next| next.with_habit_completion(&id, true))
                } else {
                    data.with_habit_completion(&id, true)
                        .and_then(|next| next.with_habit_completion(&id, false))
                };
                prop_assert_eq!(restored, Some(data));
            }
        }
    }
}

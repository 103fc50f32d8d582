use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, Utc};

use crate::config::{AnalyticsPolicy, MonthBucketing, UnmatchedGrades};
use crate::grades::{GradeCatalog, NO_GRADE};
use crate::models::{
    AnalyticsSummary, GradeConfidence, GradeShare, MonthlyTrend, PredictionRecord,
};

/// Builds the full summary for one user's records as of `now`.
pub fn summarize(
    records: &[PredictionRecord],
    catalog: &GradeCatalog,
    policy: &AnalyticsPolicy,
    now: DateTime<Utc>,
) -> AnalyticsSummary {
    let counted: Vec<&PredictionRecord> = match policy.unmatched_grades {
        UnmatchedGrades::Count => records.iter().collect(),
        UnmatchedGrades::Exclude => records
            .iter()
            .filter(|record| catalog.index_of(&record.grade).is_some())
            .collect(),
    };

    let total = counted.len();
    let mut counts = vec![0usize; catalog.len()];
    let mut confidence_sums = vec![0.0f64; catalog.len()];
    let mut confidence_total = 0.0f64;

    for record in counted.iter() {
        confidence_total += record.confidence;
        if let Some(idx) = catalog.index_of(&record.grade) {
            counts[idx] += 1;
            confidence_sums[idx] += record.confidence;
        }
    }

    let grade_distribution = catalog
        .grades()
        .iter()
        .enumerate()
        .map(|(idx, grade)| GradeShare {
            grade: grade.clone(),
            count: counts[idx],
            percentage: if total == 0 {
                0.0
            } else {
                counts[idx] as f64 / total as f64 * 100.0
            },
            color: catalog.color(idx).to_string(),
        })
        .collect();

    let confidence_by_grade = catalog
        .grades()
        .iter()
        .enumerate()
        .map(|(idx, grade)| GradeConfidence {
            grade: grade.clone(),
            confidence: round_half_up(mean(confidence_sums[idx], counts[idx])),
        })
        .collect();

    let (trends_change_percent, confidence_change_percent) =
        period_deltas(&counted, now, policy.window_days);

    AnalyticsSummary {
        total_predictions: total,
        average_confidence: round_half_up(mean(confidence_total, total)),
        most_common_grade: most_common_grade(catalog, &counts),
        grade_distribution,
        confidence_by_grade,
        quality_trends: quality_trends(&counted, policy),
        trends_change_percent,
        confidence_change_percent,
    }
}

/// Highest count wins; ties go to the grade listed first.
pub fn most_common_grade(catalog: &GradeCatalog, counts: &[usize]) -> String {
    let mut best: Option<(usize, usize)> = None;
    for (idx, &count) in counts.iter().enumerate() {
        if count == 0 {
            continue;
        }
        match best {
            Some((_, best_count)) if best_count >= count => {}
            _ => best = Some((idx, count)),
        }
    }

    best.and_then(|(idx, _)| catalog.grades().get(idx).cloned())
        .unwrap_or_else(|| NO_GRADE.to_string())
}

/// Monthly volume and confidence, oldest first, limited to the most recent
/// `policy.trend_months` months that have data.
pub fn quality_trends(records: &[&PredictionRecord], policy: &AnalyticsPolicy) -> Vec<MonthlyTrend> {
    let mut months: BTreeMap<(i32, u32), (usize, f64)> = BTreeMap::new();

    for record in records.iter() {
        let Some(processed_at) = record.processed_at else {
            continue;
        };
        let key = match policy.month_bucketing {
            MonthBucketing::Utc => {
                let utc = processed_at.with_timezone(&Utc);
                (utc.year(), utc.month())
            }
            MonthBucketing::RecordOffset => (processed_at.year(), processed_at.month()),
        };
        let entry = months.entry(key).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += record.confidence;
    }

    let skip = months.len().saturating_sub(policy.trend_months);
    months
        .into_iter()
        .skip(skip)
        .map(|((year, month), (count, confidence))| MonthlyTrend {
            month: format!("{year:04}-{month:02}"),
            prediction_count: count,
            average_confidence: round_half_up(mean(confidence, count)),
        })
        .collect()
}

/// Volume and confidence change between the latest window and the one
/// before it, as whole percents.
pub fn period_deltas(
    records: &[&PredictionRecord],
    now: DateTime<Utc>,
    window_days: i64,
) -> (i64, i64) {
    let Some(window) = Duration::try_days(window_days.max(1)) else {
        return (0, 0);
    };
    let Some(current_start) = now.checked_sub_signed(window) else {
        return (0, 0);
    };
    let Some(previous_start) = current_start.checked_sub_signed(window) else {
        return (0, 0);
    };

    let current = window_stats(records, |at| at >= current_start);
    let previous = window_stats(records, |at| at >= previous_start && at < current_start);

    let trends_change = if previous.count > 0 {
        percent_change(current.count as f64, previous.count as f64)
    } else if current.count > 0 {
        100
    } else {
        0
    };

    let confidence_change = if previous.mean_confidence > 0.0 {
        percent_change(current.mean_confidence, previous.mean_confidence)
    } else {
        0
    };

    (trends_change, confidence_change)
}

#[derive(Debug, Clone, Copy)]
struct WindowStats {
    count: usize,
    mean_confidence: f64,
}

fn window_stats<F>(records: &[&PredictionRecord], in_window: F) -> WindowStats
where
    F: Fn(DateTime<Utc>) -> bool,
{
    let mut count = 0usize;
    let mut confidence = 0.0f64;

    for record in records.iter() {
        let Some(processed_at) = record.processed_at else {
            continue;
        };
        if in_window(processed_at.with_timezone(&Utc)) {
            count += 1;
            confidence += record.confidence;
        }
    }

    WindowStats {
        count,
        mean_confidence: mean(confidence, count),
    }
}

fn percent_change(current: f64, previous: f64) -> i64 {
    round_half_up((current - previous) / previous * 100.0)
}

fn mean(sum: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Rounds .5 toward positive infinity, negatives included.
pub fn round_half_up(value: f64) -> i64 {
    if value.is_finite() {
        (value + 0.5).floor() as i64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::parse_processed_at;
    use chrono::TimeZone;

    fn numbered_catalog() -> GradeCatalog {
        GradeCatalog::with_palette(
            ["Grade_1", "Grade_2", "Grade_3", "Grade_4"],
            crate::config::default_palette(),
        )
    }

    fn record(grade: &str, confidence: f64, processed_at: &str) -> PredictionRecord {
        PredictionRecord {
            user_id: "user-1".to_string(),
            grade: grade.to_string(),
            confidence,
            processed_at: parse_processed_at(processed_at),
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 15, 0, 0, 0).unwrap()
    }

    fn days_before(now: DateTime<Utc>, days: i64) -> String {
        (now - Duration::days(days)).to_rfc3339()
    }

    #[test]
    fn empty_history_yields_zeroed_summary() {
        let catalog = numbered_catalog();
        let summary = summarize(&[], &catalog, &AnalyticsPolicy::default(), fixed_now());

        assert_eq!(summary.total_predictions, 0);
        assert_eq!(summary.average_confidence, 0);
        assert_eq!(summary.most_common_grade, "N/A");
        assert_eq!(summary.grade_distribution.len(), 4);
        assert!(summary
            .grade_distribution
            .iter()
            .all(|share| share.count == 0 && share.percentage == 0.0));
        assert!(summary.confidence_by_grade.iter().all(|g| g.confidence == 0));
        assert!(summary.quality_trends.is_empty());
        assert_eq!(summary.trends_change_percent, 0);
        assert_eq!(summary.confidence_change_percent, 0);
    }

    #[test]
    fn summarizes_mixed_grade_history() {
        let records = vec![
            record("Grade_1", 90.0, "2024-01-10"),
            record("Grade_1", 70.0, "2024-01-20"),
            record("Grade_4", 50.0, "2024-02-01"),
        ];
        let summary = summarize(
            &records,
            &numbered_catalog(),
            &AnalyticsPolicy::default(),
            fixed_now(),
        );

        assert_eq!(summary.total_predictions, 3);
        assert_eq!(summary.average_confidence, 70);
        assert_eq!(summary.most_common_grade, "Grade_1");

        let by_grade: Vec<i64> = summary
            .confidence_by_grade
            .iter()
            .map(|g| g.confidence)
            .collect();
        assert_eq!(by_grade, vec![80, 0, 0, 50]);

        assert_eq!(summary.grade_distribution[0].count, 2);
        assert!((summary.grade_distribution[0].percentage - 66.666).abs() < 0.01);
        assert_eq!(summary.grade_distribution[3].count, 1);

        assert_eq!(
            summary.quality_trends,
            vec![
                MonthlyTrend {
                    month: "2024-01".to_string(),
                    prediction_count: 2,
                    average_confidence: 80,
                },
                MonthlyTrend {
                    month: "2024-02".to_string(),
                    prediction_count: 1,
                    average_confidence: 50,
                },
            ]
        );

        // 2 records vs 1 in the window before; mean 60 vs 90.
        assert_eq!(summary.trends_change_percent, 100);
        assert_eq!(summary.confidence_change_percent, -33);
    }

    #[test]
    fn single_record_average_is_exact() {
        let records = vec![record("Grade_2", 87.0, "2024-02-01")];
        let summary = summarize(
            &records,
            &numbered_catalog(),
            &AnalyticsPolicy::default(),
            fixed_now(),
        );
        assert_eq!(summary.average_confidence, 87);
        assert_eq!(summary.confidence_by_grade[1].confidence, 87);
    }

    #[test]
    fn unparseable_confidence_counts_as_zero() {
        let raw: Vec<crate::models::RawPredictionRecord> = serde_json::from_str(
            r#"[
                {"userId": "u", "grade": "Grade_1", "confidence": "not-a-number", "processedAt": "2024-02-01"},
                {"userId": "u", "grade": "Grade_1", "confidence": 80, "processedAt": "2024-02-02"}
            ]"#,
        )
        .unwrap();
        let records: Vec<PredictionRecord> = raw.into_iter().map(PredictionRecord::from).collect();

        let summary = summarize(
            &records,
            &numbered_catalog(),
            &AnalyticsPolicy::default(),
            fixed_now(),
        );
        assert_eq!(summary.total_predictions, 2);
        assert_eq!(summary.average_confidence, 40);
        assert_eq!(summary.confidence_by_grade[0].confidence, 40);
    }

    #[test]
    fn unknown_grades_count_toward_total_only() {
        let records = vec![
            record("grade_3", 60.0, "2024-02-01"),
            record(" GRADE_3 ", 80.0, "2024-02-02"),
            record("Grade A", 100.0, "2024-02-03"),
            record("", 40.0, "2024-02-04"),
        ];
        let summary = summarize(
            &records,
            &numbered_catalog(),
            &AnalyticsPolicy::default(),
            fixed_now(),
        );

        assert_eq!(summary.total_predictions, 4);
        assert_eq!(summary.average_confidence, 70);
        assert_eq!(summary.most_common_grade, "Grade_3");

        let matched: usize = summary.grade_distribution.iter().map(|g| g.count).sum();
        assert_eq!(matched, summary.total_predictions - 2);

        let share: f64 = summary
            .grade_distribution
            .iter()
            .map(|g| g.percentage)
            .sum();
        assert!((share - 50.0).abs() < 1e-9);
        assert!(summary
            .grade_distribution
            .iter()
            .all(|g| (0.0..=100.0).contains(&g.percentage)));
        assert_eq!(summary.confidence_by_grade[2].confidence, 70);
    }

    #[test]
    fn exclude_policy_drops_unknown_grades_everywhere() {
        let records = vec![
            record("Grade_2", 60.0, "2024-02-01"),
            record("mystery", 100.0, "2024-02-02"),
        ];
        let policy = AnalyticsPolicy {
            unmatched_grades: UnmatchedGrades::Exclude,
            ..AnalyticsPolicy::default()
        };
        let summary = summarize(&records, &numbered_catalog(), &policy, fixed_now());

        assert_eq!(summary.total_predictions, 1);
        assert_eq!(summary.average_confidence, 60);
        assert_eq!(summary.grade_distribution[1].percentage, 100.0);
        assert_eq!(summary.quality_trends[0].prediction_count, 1);
    }

    #[test]
    fn ties_go_to_the_first_listed_grade() {
        let records = vec![
            record("Grade_3", 50.0, "2024-02-01"),
            record("Grade_2", 50.0, "2024-02-01"),
            record("Grade_3", 50.0, "2024-02-01"),
            record("Grade_2", 50.0, "2024-02-01"),
        ];
        let summary = summarize(
            &records,
            &numbered_catalog(),
            &AnalyticsPolicy::default(),
            fixed_now(),
        );
        assert_eq!(summary.most_common_grade, "Grade_2");
    }

    #[test]
    fn only_unknown_grades_report_no_common_grade() {
        let records = vec![record("Grade Z", 50.0, "2024-02-01")];
        let summary = summarize(
            &records,
            &numbered_catalog(),
            &AnalyticsPolicy::default(),
            fixed_now(),
        );
        assert_eq!(summary.total_predictions, 1);
        assert_eq!(summary.most_common_grade, NO_GRADE);
    }

    #[test]
    fn trends_keep_the_latest_six_months() {
        let records: Vec<PredictionRecord> = (1..=8)
            .rev()
            .map(|month| record("Grade_1", 50.0 + month as f64, &format!("2023-{month:02}-15")))
            .collect();
        let refs: Vec<&PredictionRecord> = records.iter().collect();

        let trends = quality_trends(&refs, &AnalyticsPolicy::default());
        let months: Vec<&str> = trends.iter().map(|t| t.month.as_str()).collect();
        assert_eq!(
            months,
            vec!["2023-03", "2023-04", "2023-05", "2023-06", "2023-07", "2023-08"]
        );
        assert_eq!(trends[0].average_confidence, 53);
    }

    #[test]
    fn trends_cross_year_boundaries_in_order() {
        let records = vec![
            record("Grade_1", 50.0, "2024-01-03"),
            record("Grade_1", 50.0, "2023-12-30"),
            record("Grade_1", 50.0, "2023-11-02"),
        ];
        let refs: Vec<&PredictionRecord> = records.iter().collect();
        let trends = quality_trends(&refs, &AnalyticsPolicy::default());
        let months: Vec<&str> = trends.iter().map(|t| t.month.as_str()).collect();
        assert_eq!(months, vec!["2023-11", "2023-12", "2024-01"]);
    }

    #[test]
    fn records_without_timestamps_skip_trends_and_windows() {
        let records = vec![
            record("Grade_1", 90.0, "not a date"),
            record("Grade_1", 70.0, &days_before(fixed_now(), 5)),
        ];
        let summary = summarize(
            &records,
            &numbered_catalog(),
            &AnalyticsPolicy::default(),
            fixed_now(),
        );

        assert_eq!(summary.total_predictions, 2);
        assert_eq!(summary.average_confidence, 80);
        assert_eq!(summary.quality_trends.len(), 1);
        assert_eq!(summary.quality_trends[0].prediction_count, 1);
        assert_eq!(summary.trends_change_percent, 100);
    }

    #[test]
    fn month_bucketing_follows_policy() {
        let records = vec![record("Grade_1", 75.0, "2024-01-31T23:30:00-05:00")];
        let refs: Vec<&PredictionRecord> = records.iter().collect();

        let utc = quality_trends(&refs, &AnalyticsPolicy::default());
        assert_eq!(utc[0].month, "2024-02");

        let local = quality_trends(
            &refs,
            &AnalyticsPolicy {
                month_bucketing: MonthBucketing::RecordOffset,
                ..AnalyticsPolicy::default()
            },
        );
        assert_eq!(local[0].month, "2024-01");
    }

    #[test]
    fn window_boundaries_are_inclusive_at_the_start() {
        let now = fixed_now();
        let records = vec![
            record("Grade_1", 80.0, &days_before(now, 30)),
            record("Grade_1", 80.0, &days_before(now, 60)),
            record("Grade_1", 80.0, &days_before(now, 61)),
        ];
        let refs: Vec<&PredictionRecord> = records.iter().collect();
        assert_eq!(period_deltas(&refs, now, 30), (0, 0));
    }

    #[test]
    fn deltas_fall_back_when_the_previous_window_is_empty() {
        let now = fixed_now();
        let current_only = vec![record("Grade_1", 80.0, &days_before(now, 2))];
        let refs: Vec<&PredictionRecord> = current_only.iter().collect();
        assert_eq!(period_deltas(&refs, now, 30), (100, 0));

        let stale = vec![record("Grade_1", 80.0, &days_before(now, 120))];
        let refs: Vec<&PredictionRecord> = stale.iter().collect();
        assert_eq!(period_deltas(&refs, now, 30), (0, 0));
    }

    #[test]
    fn confidence_delta_is_zero_when_previous_mean_is_zero() {
        let now = fixed_now();
        let records = vec![
            record("Grade_1", 0.0, &days_before(now, 40)),
            record("Grade_1", 90.0, &days_before(now, 3)),
        ];
        let refs: Vec<&PredictionRecord> = records.iter().collect();
        assert_eq!(period_deltas(&refs, now, 30), (0, 0));
    }

    #[test]
    fn shrinking_volume_gives_negative_delta() {
        let now = fixed_now();
        let records = vec![
            record("Grade_1", 60.0, &days_before(now, 35)),
            record("Grade_1", 60.0, &days_before(now, 40)),
            record("Grade_1", 60.0, &days_before(now, 45)),
            record("Grade_1", 90.0, &days_before(now, 1)),
        ];
        let refs: Vec<&PredictionRecord> = records.iter().collect();
        // 1 vs 3 -> -66.7; 90 vs 60 -> +50.
        assert_eq!(period_deltas(&refs, now, 30), (-67, 50));
    }

    #[test]
    fn summary_is_stable_for_fixed_input() {
        let records = vec![
            record("Grade_1", 90.0, "2024-01-10"),
            record("Grade_4", 55.5, "2024-02-01"),
            record("other", 10.0, "2023-12-01"),
        ];
        let catalog = numbered_catalog();
        let policy = AnalyticsPolicy::default();

        let first = summarize(&records, &catalog, &policy, fixed_now());
        let second = summarize(&records, &catalog, &policy, fixed_now());
        assert_eq!(first, second);
    }

    #[test]
    fn rounding_is_half_up() {
        assert_eq!(round_half_up(2.5), 3);
        assert_eq!(round_half_up(2.4999), 2);
        assert_eq!(round_half_up(-2.5), -2);
        assert_eq!(round_half_up(-33.34), -33);
        assert_eq!(round_half_up(f64::NAN), 0);
    }

    #[test]
    fn oversized_window_yields_no_change() {
        let records = vec![record("Grade_1", 90.0, "2024-02-10")];
        let refs: Vec<&PredictionRecord> = records.iter().collect();
        assert_eq!(period_deltas(&refs, fixed_now(), 200_000_000), (0, 0));
        assert_eq!(period_deltas(&refs, fixed_now(), i64::MAX), (0, 0));
    }
}

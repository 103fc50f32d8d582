use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::AnalyticsSummary;

pub fn build_json(summary: &AnalyticsSummary) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(summary)?)
}

pub fn build_report(user_id: &str, now: DateTime<Utc>, summary: &AnalyticsSummary) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Leaf Grading Analytics");
    let _ = writeln!(
        output,
        "Generated for {} as of {}",
        user_id,
        now.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");
    let _ = writeln!(output, "- Total predictions: {}", summary.total_predictions);
    let _ = writeln!(output, "- Average confidence: {}%", summary.average_confidence);
    let _ = writeln!(output, "- Most common grade: {}", summary.most_common_grade);
    let _ = writeln!(
        output,
        "- Predictions vs previous period: {}",
        signed_percent(summary.trends_change_percent)
    );
    let _ = writeln!(
        output,
        "- Confidence vs previous period: {}",
        signed_percent(summary.confidence_change_percent)
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Grade Distribution");

    if summary.grade_distribution.is_empty() {
        let _ = writeln!(output, "No grades configured.");
    } else {
        for share in summary.grade_distribution.iter() {
            let _ = writeln!(
                output,
                "- {}: {} predictions ({:.1}%)",
                share.grade, share.count, share.percentage
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Confidence by Grade");

    if summary.total_predictions == 0 {
        let _ = writeln!(output, "No predictions recorded yet.");
    } else {
        for grade in summary.confidence_by_grade.iter() {
            let _ = writeln!(output, "- {}: {}%", grade.grade, grade.confidence);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Quality Trends");

    if summary.quality_trends.is_empty() {
        let _ = writeln!(output, "No dated predictions to chart.");
    } else {
        for trend in summary.quality_trends.iter() {
            let _ = writeln!(
                output,
                "- {}: {} predictions (avg confidence {}%)",
                trend.month, trend.prediction_count, trend.average_confidence
            );
        }
    }

    output
}

fn signed_percent(value: i64) -> String {
    if value > 0 {
        format!("+{value}%")
    } else {
        format!("{value}%")
    }
}

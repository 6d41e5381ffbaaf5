//! Plain-text rendering of aggregate metrics.

use std::fmt::Write;

use crate::metrics::AggregateMetrics;

const NAME_WIDTH: usize = 21;
const VALUE_WIDTH: usize = 10;

/// Render `metrics` as three tables: answer quality, retrieval and system.
pub fn render(metrics: &AggregateMetrics) -> String {
    let answer = [
        ("Answer Accuracy", percent(metrics.answer_accuracy)),
        ("Exact Match Rate", percent(metrics.exact_match_rate)),
        ("Cosine Similarity", percent(metrics.cosine_similarity)),
        ("ROUGE-1", percent(metrics.rouge1)),
        ("ROUGE-2", percent(metrics.rouge2)),
        ("ROUGE-L", percent(metrics.rouge_l)),
    ];
    let retrieval = [
        ("Precision", percent(metrics.retrieval_precision)),
        ("Recall", percent(metrics.retrieval_recall)),
        ("F1 Score", percent(metrics.f1_score)),
        ("NDCG", percent(metrics.ndcg)),
        ("MRR", percent(metrics.mrr)),
    ];
    let system = [
        ("Response Latency", format!("{:.2}s", metrics.response_latency)),
        ("Context Retention", percent(metrics.context_retention)),
        ("Total Questions", metrics.total_questions.to_string()),
        ("Successful Retrievals", metrics.successful_retrievals.to_string()),
        ("Total Conversations", metrics.total_conversations.to_string()),
        ("Total Tokens", metrics.total_tokens.to_string()),
    ];

    let mut out = String::new();
    table(&mut out, "Answer Quality Metrics", &answer);
    out.push('\n');
    table(&mut out, "Retrieval Metrics", &retrieval);
    out.push('\n');
    table(&mut out, "System Metrics", &system);
    out
}

/// `0.1234` → `"12.34%"`.
pub fn percent(value: f64) -> String {
    format!("{:.2}%", value * 100.0)
}

fn table(out: &mut String, title: &str, rows: &[(&str, String)]) {
    let rule = format!(
        "+{}+{}+",
        "-".repeat(NAME_WIDTH + 2),
        "-".repeat(VALUE_WIDTH + 2)
    );
    let _ = writeln!(out, "{title}");
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "| {:<NAME_WIDTH$} | {:>VALUE_WIDTH$} |", "Metric", "Value");
    let _ = writeln!(out, "{rule}");
    for (name, value) in rows {
        let _ = writeln!(out, "| {name:<NAME_WIDTH$} | {value:>VALUE_WIDTH$} |");
    }
    let _ = writeln!(out, "{rule}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_format() {
        assert_eq!(percent(0.1234), "12.34%");
        assert_eq!(percent(1.0), "100.00%");
        assert_eq!(percent(0.0), "0.00%");
    }

    #[test]
    fn test_render_sections_and_values() {
        let metrics = AggregateMetrics {
            answer_accuracy: 0.75,
            ndcg: 0.5,
            response_latency: 1.234,
            total_tokens: 4096,
            ..Default::default()
        };
        let text = render(&metrics);
        assert!(text.contains("Answer Quality Metrics"));
        assert!(text.contains("Retrieval Metrics"));
        assert!(text.contains("System Metrics"));
        assert!(text.contains("75.00%"));
        assert!(text.contains("50.00%"));
        assert!(text.contains("1.23s"));
        assert!(text.contains("4096"));
    }

    #[test]
    fn test_rows_are_aligned() {
        let text = render(&AggregateMetrics::default());
        let widths: Vec<usize> = text
            .lines()
            .filter(|l| l.starts_with('|') || l.starts_with('+'))
            .map(|l| l.chars().count())
            .collect();
        assert!(widths.windows(2).all(|w| w[0] == w[1]));
    }
}

//! Deterministic HTML composition of the combined critique.
//!
//! Pure formatting over the per-advisor result blobs. Advisors render in
//! insertion-key order (the outputs map is a BTreeMap), so identical inputs
//! always produce identical documents.

use mondrian_protocol::{Dimension, JobRecord};
use std::fmt::Write as _;

/// Compose the final HTML critique from a job's per-advisor outputs.
pub fn render_critique(record: &JobRecord) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\">");
    html.push_str("<title>Mondrian Critique</title></head>\n<body>\n");
    let _ = writeln!(html, "<h1>Critique for {}</h1>", escape(&record.image_ref));

    for (advisor_id, output) in &record.advisor_outputs {
        let _ = writeln!(html, "<section class=\"advisor\">");
        let _ = writeln!(html, "<h2>{}</h2>", escape(advisor_id));

        if let Some(mode) = output.get("mode_used").and_then(|v| v.as_str()) {
            let _ = writeln!(html, "<p class=\"mode\">Mode: {}</p>", escape(mode));
        }

        if let Some(analysis) = output.get("analysis") {
            if let Some(grade) = analysis.get("overall_grade").and_then(|v| v.as_f64()) {
                let _ = writeln!(html, "<p class=\"grade\">Overall grade: {:.1}</p>", grade);
            }
            html.push_str("<table class=\"dimensions\">\n");
            html.push_str("<tr><th>Dimension</th><th>Score</th><th>Comment</th></tr>\n");
            for dim in Dimension::ALL {
                let Some(entry) = analysis.get(dim.as_str()) else {
                    continue;
                };
                let score = entry.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0);
                let comment = entry.get("comment").and_then(|v| v.as_str()).unwrap_or("");
                let _ = writeln!(
                    html,
                    "<tr><td>{}</td><td>{:.1}</td><td>{}</td></tr>",
                    dim.display_name(),
                    score,
                    escape(comment)
                );
            }
            html.push_str("</table>\n");
        }

        if let Some(meta) = output.get("metadata") {
            let representatives = meta
                .get("representatives")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            let total_ms = meta.get("total_ms").and_then(|v| v.as_u64()).unwrap_or(0);
            let _ = writeln!(
                html,
                "<footer class=\"meta\">{} reference examples, {} ms</footer>",
                representatives, total_ms
            );
        }

        html.push_str("</section>\n");
    }

    html.push_str("</body>\n</html>\n");
    html
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use mondrian_protocol::AnalysisMode;
    use serde_json::json;

    fn record_with_output() -> JobRecord {
        let mut record = JobRecord::new(
            "uploads/u.jpg".to_string(),
            "ansel".to_string(),
            AnalysisMode::Baseline,
        );
        record.advisor_outputs.insert(
            "ansel".to_string(),
            json!({
                "mode_used": "baseline",
                "analysis": {
                    "composition": {"score": 8.5, "comment": "strong <diagonals>"},
                    "overall_grade": 8.2
                },
                "metadata": {"representatives": 0, "total_ms": 42}
            }),
        );
        record
    }

    #[test]
    fn renders_advisor_sections() {
        let html = render_critique(&record_with_output());
        assert!(html.contains("<h2>ansel</h2>"));
        assert!(html.contains("Overall grade: 8.2"));
        assert!(html.contains("Composition"));
        assert!(html.contains("Mode: baseline"));
    }

    #[test]
    fn escapes_model_text() {
        let html = render_critique(&record_with_output());
        assert!(html.contains("strong &lt;diagonals&gt;"));
        assert!(!html.contains("strong <diagonals>"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let record = record_with_output();
        assert_eq!(render_critique(&record), render_critique(&record));
    }
}

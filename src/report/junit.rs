//! # Renderizador JUnit XML
//!
//! Emite um `<testsuite>` por story e um `<testcase>` por step, no
//! dialeto que Jenkins/GitLab/CircleCI consomem. Falhas viram
//! `<failure>` com a mensagem do erro e as evidências no corpo.

use super::ReportAggregator;

/// Renderiza a suite inteira como JUnit XML.
pub fn render_junit(agg: &ReportAggregator) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");

    let total: usize = agg.stories.iter().map(|s| s.steps.len()).sum();
    let failures: usize = agg
        .stories
        .iter()
        .flat_map(|s| s.steps.iter())
        .filter(|step| !step.passed)
        .count();

    out.push_str(&format!(
        "<testsuites name=\"{}\" tests=\"{}\" failures=\"{}\">\n",
        escape(&agg.suite_name),
        total,
        failures
    ));

    for story in &agg.stories {
        let story_failures = story.steps.iter().filter(|s| !s.passed).count();
        let story_time_ms: u64 = story.steps.iter().map(|s| s.duration_ms).sum();
        out.push_str(&format!(
            "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" time=\"{:.3}\">\n",
            escape(&story.name),
            story.steps.len(),
            story_failures,
            story_time_ms as f64 / 1000.0
        ));

        for step in &story.steps {
            let classname = format!("{}.{}", sanitize_class(&agg.suite_name), sanitize_class(&story.name));
            out.push_str(&format!(
                "    <testcase name=\"{}\" classname=\"{}\" time=\"{:.3}\"",
                escape(&step.name),
                escape(&classname),
                step.duration_ms as f64 / 1000.0
            ));

            if step.passed {
                out.push_str("/>\n");
            } else {
                out.push_str(">\n");
                let message = step
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "step falhou".to_string());
                let kind = step
                    .error
                    .as_ref()
                    .map(|e| e.kind.as_str())
                    .unwrap_or("failed");
                out.push_str(&format!(
                    "      <failure message=\"{}\" type=\"{}\">",
                    escape(&message),
                    escape(kind)
                ));
                for line in &step.evidence {
                    out.push_str(&escape(line));
                    out.push('\n');
                }
                out.push_str("</failure>\n");
                out.push_str("    </testcase>\n");
            }
        }

        out.push_str("  </testsuite>\n");
    }

    out.push_str("</testsuites>\n");
    out
}

/// Escapa os cinco caracteres reservados do XML.
fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// Nome de classe JUnit: pontos são separadores, então viram `_`.
fn sanitize_class(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

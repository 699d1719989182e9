//! Engine output fixtures

use a11y_core::Impact;
use serde_json::{json, Value};

fn impact_name(impact: Impact) -> &'static str {
    match impact {
        Impact::Critical => "critical",
        Impact::Serious => "serious",
        Impact::Moderate => "moderate",
        Impact::Minor => "minor",
    }
}

/// Raw engine output with one violation per `(impact, node_count)` and
/// `passes` passing rules
pub fn engine_results(violations: &[(Impact, usize)], passes: usize) -> Value {
    let violations: Vec<Value> = violations
        .iter()
        .enumerate()
        .map(|(i, (impact, nodes))| {
            json!({
                "id": format!("rule-{i}"),
                "impact": impact_name(*impact),
                "description": "fixture violation",
                "help": "fix it",
                "helpUrl": format!("https://dequeuniversity.com/rules/axe/4.8/rule-{i}"),
                "tags": ["wcag2a"],
                "nodes": (0..*nodes)
                    .map(|n| json!({ "target": [format!("#el-{i}-{n}")], "html": "<div></div>" }))
                    .collect::<Vec<_>>(),
            })
        })
        .collect();
    let passes: Vec<Value> = (0..passes)
        .map(|i| json!({ "id": format!("pass-{i}"), "nodes": [{ "target": "html", "html": "<html>" }] }))
        .collect();

    json!({
        "violations": violations,
        "passes": passes,
        "incomplete": [],
        "inapplicable": [],
        "timestamp": "2024-01-01T00:00:00.000Z",
        "url": "http://site.test/page.html",
        "testEngine": { "name": "axe-core", "version": "4.8.3" }
    })
}

/// No violations, `passes` passing rules
pub fn clean_results(passes: usize) -> Value {
    engine_results(&[], passes)
}

/// 2 critical rules over 3 nodes, 1 serious over 1 node, 20 passes (scores 0)
pub fn heavy_results() -> Value {
    engine_results(
        &[(Impact::Critical, 2), (Impact::Critical, 1), (Impact::Serious, 1)],
        20,
    )
}

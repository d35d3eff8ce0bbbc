//! Markdown rendering of a plan for terminal display.

use serde_json::Value;

use super::{Plan, SectionContent};

/// Render a plan as a standalone markdown document.
pub fn render_markdown(plan: &Plan) -> String {
    let mut out = String::new();

    let heading = match (&plan.title, plan.company.is_empty()) {
        (Some(title), _) => title.clone(),
        (None, false) => format!("{} Account Plan", plan.company),
        (None, true) => "Untitled Account Plan".to_string(),
    };
    out.push_str(&format!("# {heading}\n\n"));

    if !plan.company.is_empty() {
        out.push_str(&format!("**Company:** {}  \n", plan.company));
    }
    if !plan.goal.is_empty() {
        out.push_str(&format!("**Goal:** {}  \n", plan.goal));
    }
    out.push_str(&format!(
        "**Version:** {} (updated {})\n",
        plan.version,
        plan.updated_at.format("%Y-%m-%d %H:%M UTC")
    ));

    for section in &plan.sections {
        out.push_str(&format!("\n## {}\n\n", section.title));
        match &section.content {
            SectionContent::Text(text) => {
                out.push_str(text.trim());
                out.push('\n');
            }
            SectionContent::List(items) => {
                for item in items {
                    out.push_str(&format!("- {}\n", inline(item)));
                }
            }
            SectionContent::Map(map) => {
                for (key, value) in map {
                    out.push_str(&format!("### {key}\n\n"));
                    match value {
                        Value::Array(items) => {
                            for item in items {
                                out.push_str(&format!("- {}\n", inline(item)));
                            }
                        }
                        other => {
                            out.push_str(inline(other).trim());
                            out.push('\n');
                        }
                    }
                    out.push('\n');
                }
            }
        }
    }

    out
}

/// One-line rendering of a JSON value inside a list or mapping.
fn inline(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Object(map) => {
            // Source entries render as links.
            if let (Some(Value::String(title)), Some(Value::String(url))) =
                (map.get("title"), map.get("url"))
            {
                return format!("[{title}]({url})");
            }
            map.iter()
                .map(|(k, v)| format!("{k}: {}", inline(v)))
                .collect::<Vec<_>>()
                .join("; ")
        }
        Value::Array(items) => items.iter().map(inline).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

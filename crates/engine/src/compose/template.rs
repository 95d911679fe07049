//! Section templates with named placeholders and repeating groups.
//!
//! `{name}` substitutes a scalar from the render context. A repeating group
//! `{#items} ... {/items}` expands its body once per item; inside the body,
//! placeholders resolve from the item first, then from the outer context.
//! Unknown placeholders render as empty strings.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    Markdown,
    Html,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SectionTemplate {
    pub id: String,
    pub title: String,
    pub body: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportTemplate {
    pub id: String,
    pub name: String,
    pub format: ReportFormat,
    pub sections: Vec<SectionTemplate>,
}

/// Values and lists available to placeholder substitution.
#[derive(Clone, Debug, Default)]
pub struct RenderContext {
    pub values: HashMap<String, String>,
    pub lists: HashMap<String, Vec<HashMap<String, String>>>,
}

impl RenderContext {
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn set_list(&mut self, key: impl Into<String>, items: Vec<HashMap<String, String>>) {
        self.lists.insert(key.into(), items);
    }
}

/// Render one template body against a context.
pub fn render_body(body: &str, ctx: &RenderContext) -> String {
    render_scope(body, ctx, None)
}

fn render_scope(
    body: &str,
    ctx: &RenderContext,
    item: Option<&HashMap<String, String>>,
) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        rest = &rest[open..];

        // Repeating group?
        if let Some(group_name) = rest.strip_prefix("{#").and_then(|tail| {
            tail.find('}').map(|idx| &tail[..idx])
        }) {
            let header_len = group_name.len() + 3; // "{#" + name + "}"
            let close_marker = format!("{{/{group_name}}}");
            if let Some(close) = rest[header_len..].find(&close_marker) {
                let inner = &rest[header_len..header_len + close];
                if let Some(items) = ctx.lists.get(group_name) {
                    for entry in items {
                        out.push_str(&render_scope(inner, ctx, Some(entry)));
                    }
                }
                rest = &rest[header_len + close + close_marker.len()..];
                continue;
            }
        }

        // Scalar placeholder?
        match rest.find('}') {
            Some(close) => {
                let name = &rest[1..close];
                if name.is_empty()
                    || name.starts_with('#')
                    || name.starts_with('/')
                    || name.contains('{')
                {
                    // Not a placeholder; emit the brace literally.
                    out.push('{');
                    rest = &rest[1..];
                } else {
                    let value = item
                        .and_then(|entry| entry.get(name))
                        .or_else(|| ctx.values.get(name));
                    if let Some(value) = value {
                        out.push_str(value);
                    }
                    rest = &rest[close + 1..];
                }
            }
            None => {
                out.push_str(rest);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Join rendered sections into one artifact in the requested format.
pub fn join_sections(sections: &[(String, String)], format: ReportFormat) -> String {
    match format {
        ReportFormat::Markdown => sections
            .iter()
            .map(|(title, body)| format!("## {title}\n\n{body}"))
            .collect::<Vec<_>>()
            .join("\n\n"),
        ReportFormat::Html => {
            let mut out = String::from("<article>\n");
            for (title, body) in sections {
                out.push_str(&format!("<h2>{}</h2>\n", escape_html(title)));
                for paragraph in body.split("\n\n") {
                    let paragraph = paragraph.trim();
                    if !paragraph.is_empty() {
                        out.push_str(&format!(
                            "<p>{}</p>\n",
                            escape_html(paragraph).replace('\n', "<br/>")
                        ));
                    }
                }
            }
            out.push_str("</article>");
            out
        }
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RenderContext {
        let mut ctx = RenderContext::default();
        ctx.set("product", "Acme Widget");
        ctx.set("position", "competitive");
        ctx.set_list(
            "competitors",
            vec![
                [("name", "Globex"), ("quality", "high")]
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                [("name", "Initech"), ("quality", "low")]
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ],
        );
        ctx
    }

    #[test]
    fn scalar_substitution() {
        let out = render_body("{product} is {position}.", &ctx());
        assert_eq!(out, "Acme Widget is competitive.");
    }

    #[test]
    fn unknown_placeholder_renders_empty() {
        let out = render_body("[{missing}]", &ctx());
        assert_eq!(out, "[]");
    }

    #[test]
    fn repeating_group_expands_per_item() {
        let out = render_body("{#competitors}- {name} ({quality})\n{/competitors}", &ctx());
        assert_eq!(out, "- Globex (high)\n- Initech (low)\n");
    }

    #[test]
    fn group_items_shadow_outer_values() {
        let mut context = ctx();
        context.set("name", "OUTER");
        let out = render_body("{#competitors}{name},{/competitors}{name}", &context);
        assert_eq!(out, "Globex,Initech,OUTER");
    }

    #[test]
    fn missing_list_renders_nothing() {
        let out = render_body("<{#ghosts}{name}{/ghosts}>", &ctx());
        assert_eq!(out, "<>");
    }

    #[test]
    fn unterminated_group_header_is_literal() {
        let out = render_body("a {#broken b", &ctx());
        assert_eq!(out, "a {#broken b");
    }

    #[test]
    fn stray_braces_survive() {
        let out = render_body("json: {{product}}", &ctx());
        // "{{product}}" — the first brace is literal, the inner resolves.
        assert_eq!(out, "json: {Acme Widget}");
    }

    #[test]
    fn markdown_join() {
        let sections = vec![
            ("Summary".to_string(), "All good.".to_string()),
            ("Detail".to_string(), "More words.".to_string()),
        ];
        let out = join_sections(&sections, ReportFormat::Markdown);
        assert!(out.starts_with("## Summary\n\nAll good."));
        assert!(out.contains("## Detail"));
    }

    #[test]
    fn html_join_escapes() {
        let sections = vec![("A & B".to_string(), "x < y".to_string())];
        let out = join_sections(&sections, ReportFormat::Html);
        assert!(out.contains("<h2>A &amp; B</h2>"));
        assert!(out.contains("<p>x &lt; y</p>"));
    }
}

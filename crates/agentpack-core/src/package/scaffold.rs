//! HTML scaffolds around the embedded package sections.

use super::UiVariant;
use crate::integrity::IntegrityRecord;
use crate::manifest::Manifest;

const FULL_CSS: &str = "\
body{margin:0;font-family:system-ui,-apple-system,sans-serif;background:#f6f7f9;color:#1d2330}
.agent{max-width:760px;margin:40px auto;padding:24px;background:#fff;border-radius:10px;box-shadow:0 1px 4px rgba(0,0,0,.08)}
.agent header h1{margin:0 0 4px;font-size:1.4rem}
.agent .version{margin:0;color:#6b7385;font-size:.85rem}
.agent .description{color:#3b4252}
.agent-run textarea{width:100%;min-height:96px;box-sizing:border-box;font-family:ui-monospace,monospace}
.agent-run button{margin-top:8px;padding:6px 16px}
.agent-run pre{background:#0f1320;color:#d8dee9;padding:12px;border-radius:6px;min-height:48px;white-space:pre-wrap}";

const MINIMAL_CSS: &str = "\
body{margin:0;font-family:system-ui,sans-serif}
.agent pre{margin:0;padding:12px;white-space:pre-wrap}";

/// Escape text for an HTML attribute value.
pub(crate) fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Wrap the already-rendered data `sections` in the document for `ui`.
pub(crate) fn render_document(
    manifest: &Manifest,
    integrity: &IntegrityRecord,
    ui: UiVariant,
    styles: Option<&str>,
    sections: &str,
) -> String {
    let title = escape_attr(manifest.display_name());
    let mut doc = String::with_capacity(sections.len() + 2048);
    doc.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    doc.push_str("<meta charset=\"utf-8\">\n");
    doc.push_str(
        "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n",
    );
    doc.push_str(&format!(
        "<meta name=\"generator\" content=\"agentpack/{}\">\n",
        env!("CARGO_PKG_VERSION")
    ));
    doc.push_str(&format!("<meta name=\"agent-ui\" content=\"{}\">\n", ui));
    doc.push_str(&format!(
        "<meta name=\"agent-integrity-manifest\" content=\"{}\">\n",
        escape_attr(&integrity.manifest)
    ));
    doc.push_str(&format!(
        "<meta name=\"agent-integrity-code\" content=\"{}\">\n",
        escape_attr(&integrity.code)
    ));
    doc.push_str(&format!("<title>{}</title>\n", title));

    let base_css = match ui {
        UiVariant::Full => Some(FULL_CSS),
        UiVariant::Minimal => Some(MINIMAL_CSS),
        UiVariant::None => None,
    };
    if base_css.is_some() || styles.is_some() {
        doc.push_str("<style>\n");
        if let Some(css) = base_css {
            doc.push_str(css);
            doc.push('\n');
        }
        if let Some(css) = styles {
            // No markup may start inside the stylesheet; `\3c ` is CSS for `<`.
            doc.push_str(&css.replace('<', "\\3c "));
            doc.push('\n');
        }
        doc.push_str("</style>\n");
    }
    doc.push_str("</head>\n<body>\n");

    match ui {
        UiVariant::Full => {
            doc.push_str("<main class=\"agent\">\n<header>\n");
            doc.push_str(&format!("<h1>{}</h1>\n", title));
            if !manifest.version.is_empty() {
                doc.push_str(&format!(
                    "<p class=\"version\">v{}</p>\n",
                    escape_attr(&manifest.version)
                ));
            }
            if let Some(desc) = &manifest.description {
                doc.push_str(&format!("<p class=\"description\">{}</p>\n", escape_attr(desc)));
            }
            doc.push_str("</header>\n<section class=\"agent-run\">\n");
            doc.push_str("<textarea id=\"agent-input\" placeholder=\"Input JSON\"></textarea>\n");
            doc.push_str("<button id=\"agent-run\" type=\"button\">Run</button>\n");
            doc.push_str("<pre id=\"agent-output\"></pre>\n");
            doc.push_str("</section>\n</main>\n");
        }
        UiVariant::Minimal => {
            doc.push_str("<div class=\"agent\"><pre id=\"agent-output\"></pre></div>\n");
        }
        UiVariant::None => {}
    }

    doc.push_str(sections);
    doc.push_str("</body>\n</html>\n");
    doc
}

//! Server-rendered upload page.

use crate::progress::TERMINAL_PREFIX;

use super::types::PageView;

/// Minimal HTML escaping for text and attribute values.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

pub fn render_page(view: &PageView) -> String {
    let message = view
        .message
        .as_ref()
        .map(|m| {
            format!(
                r#"<div class="alert alert-{kind}" role="alert">{text}</div>"#,
                kind = m.kind.as_str(),
                text = escape_html(&m.text)
            )
        })
        .unwrap_or_default();

    let process = view
        .filename
        .as_deref()
        .map(|id| {
            format!(
                r#"<section class="card">
  <p>File identifier: <code id="file-id">{id}</code></p>
  <form action="/process" method="post">
    <input type="hidden" name="filename" value="{id}">
    <button type="submit" class="btn btn-success">Process file</button>
  </form>
</section>"#,
                id = escape_html(id)
            )
        })
        .unwrap_or_default();

    let log = match (&view.filename, view.show_log) {
        (Some(id), true) => format!(
            r#"<section class="card">
  <h2>Agent log</h2>
  <pre id="log">Waiting for the agent...</pre>
</section>
<script>
  const logEl = document.getElementById("log");
  const terminal = new RegExp("^{prefix}", "m");
  async function poll() {{
    try {{
      const res = await fetch("/log/{id}");
      const text = await res.text();
      logEl.textContent = text;
      logEl.scrollTop = logEl.scrollHeight;
      if (terminal.test(text)) return;
    }} catch (e) {{
      console.error(e);
    }}
    setTimeout(poll, 2000);
  }}
  poll();
</script>"#,
            prefix = TERMINAL_PREFIX,
            id = escape_html(id)
        ),
        _ => String::new(),
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>CSV Agent</title>
  <style>
    body {{ font-family: system-ui, sans-serif; max-width: 960px; margin: 2rem auto; padding: 0 1rem; }}
    .alert {{ padding: .75rem 1rem; border-radius: .25rem; margin-bottom: 1rem; }}
    .alert-success {{ background: #d1e7dd; color: #0f5132; }}
    .alert-danger {{ background: #f8d7da; color: #842029; }}
    .alert-info {{ background: #cff4fc; color: #055160; }}
    .card {{ border: 1px solid #ddd; border-radius: .25rem; padding: 1rem; margin-bottom: 1rem; }}
    pre {{ background: #f6f8fa; padding: 1rem; max-height: 32rem; overflow: auto; white-space: pre-wrap; }}
  </style>
</head>
<body>
  <h1>CSV Agent</h1>
  {message}
  <section class="card">
    <form action="/upload" method="post" enctype="multipart/form-data">
      <input type="file" name="file" accept=".csv" required>
      <button type="submit" class="btn btn-primary">Upload</button>
    </form>
  </section>
  {process}
  {log}
</body>
</html>
"#,
        message = message,
        process = process,
        log = log
    )
}

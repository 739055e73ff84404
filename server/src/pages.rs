//! Server-rendered HTML pages.

const STYLE: &str = r#"
      html, body { margin: 0; font-family: ui-sans-serif, system-ui, -apple-system, Segoe UI, sans-serif; background: rgb(30, 30, 30); color: #eee; }
      main { max-width: 1100px; margin: 0 auto; padding: 24px; }
      .gallery { display: flex; flex-wrap: wrap; gap: 12px; }
      .gallery img { width: 200px; height: 200px; object-fit: contain; background: #000; }
      table { border-collapse: collapse; margin-top: 12px; }
      th, td { border: 1px solid #555; padding: 4px 8px; text-align: left; }
      .pass { color: #4caf50; }
      .fail { color: #f44336; }
      #plot img { max-width: 100%; }
      input, select, button { background: rgb(50, 50, 50); color: #eee; border: 1px solid #666; padding: 4px 8px; }
"#;

fn layout(title: &str, body: &str) -> String {
    format!(
        r##"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>{title}</title>
    <style>{STYLE}</style>
  </head>
  <body>
    <main>
{body}
    </main>
    <script src="/static/js/script.js"></script>
  </body>
</html>"##,
        title = escape_html(title),
    )
}

/// Module-selection page. `image_urls` are display images of the currently
/// recorded uploads.
pub fn modules_page(image_urls: &[String]) -> String {
    let gallery: String = image_urls
        .iter()
        .map(|url| {
            let url = escape_html(url);
            format!(r#"        <img src="{url}" alt="{url}" />"#) + "\n"
        })
        .collect();
    let body = format!(
        r##"      <h1>Winston-Lutz</h1>
      <section id="upload">
        <input type="file" id="fileInput" multiple />
        <progress id="uploadProgress" max="100" value="0"></progress>
        <ul id="fileList"></ul>
      </section>
      <section id="parameters">
        <label>BB size (mm) <input id="BB_size" type="number" value="5" /></label>
        <label>Low density BB
          <select id="lowdensity"><option value="false">No</option><option value="true">Yes</option></select>
        </label>
        <label>Tolerance <input id="tolerance" type="number" value="1" /></label>
        <button id="analyzeButton">Analyze</button>
      </section>
      <section class="gallery">
{gallery}      </section>
      <section id="results"></section>
      <section id="plot"></section>"##
    );
    layout("QA Modules", &body)
}

pub fn page2() -> String {
    layout(
        "Report an issue",
        r##"      <h1>Report an issue</h1>
      <form id="issueForm">
        <input id="issueTitle" placeholder="Title" />
        <textarea id="issueBody" placeholder="Describe the problem"></textarea>
        <button type="submit">Submit</button>
      </form>
      <ul id="issueList"></ul>"##,
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

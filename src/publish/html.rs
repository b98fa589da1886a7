//! HTML page generation.
//!
//! Every analyzed file `dir/x.cpp` gets a sibling page `dir/x.cpp.htm`. The
//! shared `template.css`, `template.js` and `index.htm` live at the root and
//! are rewritten on every publish.

use super::{PublishSummary, Publisher, INDEX_PAGE, SCRIPT_ASSET, STYLE_ASSET};
use crate::analysis::{Analysis, Scope};
use crate::error::Result;
use crate::paths::page_name;
use chrono::Local;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

const STYLE: &str = "\
body {
  margin: 20px; color: black; background-color: #eee;
  font-family: Consolas, monospace; font-weight: 600; font-size: 110%;
}

.indent {
  margin-left: 20px; margin-right: 20px;
}

h4 {
  margin-bottom: 3px; margin-top: 3px;
}

pre {
  padding: 0; border: 0; margin: 0;
}
";

const SCRIPT: &str = "\
function btn(id) {
    if (id > 0) {
        var unfold = document.getElementById(id);
        var fold = document.getElementById(-parseInt(id));

        unfold.style.display = 'none';
        fold.style.display = '';
    }

    else {
        var unfold = document.getElementById(-parseInt(id));
        var fold = document.getElementById(id);

        unfold.style.display = '';
        fold.style.display = 'none';
    }
}
";

/// Writes one page per analyzed file plus the shared assets.
#[derive(Debug, Clone)]
pub struct HtmlPublisher {
    extension: String,
}

impl Default for HtmlPublisher {
    fn default() -> Self {
        Self::new(crate::wire::PAGE_EXTENSION)
    }
}

impl HtmlPublisher {
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
        }
    }

    fn page(&self, file: &str) -> String {
        page_name(file, &self.extension)
    }

    fn render_page(&self, file: &str, source: &str, analysis: &Analysis) -> String {
        let mut out = String::new();
        prologue(&mut out, &self.page(file));
        header(&mut out, file);

        out.push_str("  <hr />\n");
        out.push_str("  <div class=\"indent\">\n");
        out.push_str("    <h4>Dependencies:</h4>\n");
        for (i, dep) in analysis.graph.dependencies(file).enumerate() {
            if i > 0 {
                out.push_str("    <br>\n");
            }
            let _ = writeln!(
                out,
                "    <a href=\"{}\">{}</a>",
                escape(&relative_link(file, &self.page(dep))),
                escape(base_name(dep))
            );
        }
        out.push_str("  </div>\n");
        out.push_str("  <hr />\n");

        out.push_str("<pre>\n");
        out.push_str(&render_code(source, &analysis.scopes.scopes_of(file)));
        out.push_str("</pre>\n");
        footer(&mut out);
        out
    }

    fn render_index(&self, analysis: &Analysis) -> String {
        let mut out = String::new();
        prologue(&mut out, INDEX_PAGE);
        header(&mut out, INDEX_PAGE);
        for (i, file) in analysis.files.iter().enumerate() {
            if i > 0 {
                out.push_str("    <br>\n");
            }
            let _ = writeln!(
                out,
                "    <a href=\"{}\">{}</a>",
                escape(&self.page(file)),
                escape(file)
            );
        }
        footer(&mut out);
        out
    }
}

impl Publisher for HtmlPublisher {
    fn publish(&self, root: &Path, analysis: &Analysis) -> Result<PublishSummary> {
        fs::create_dir_all(root)?;
        write_atomic(&root.join(STYLE_ASSET), STYLE.as_bytes())?;
        write_atomic(&root.join(SCRIPT_ASSET), SCRIPT.as_bytes())?;

        let mut summary = PublishSummary::default();
        for file in &analysis.files {
            let source = match fs::read(root.join(file)) {
                Ok(b) => String::from_utf8_lossy(&b).into_owned(),
                Err(e) => {
                    warn!("Can't open {}: {}", file, e);
                    summary.skipped += 1;
                    continue;
                }
            };
            let html = self.render_page(file, &source, analysis);
            let target = root.join(self.page(file));
            write_atomic(&target, html.as_bytes())?;
            debug!("Published {}", target.display());
            summary.pages += 1;
        }

        write_atomic(&root.join(INDEX_PAGE), self.render_index(analysis).as_bytes())?;
        Ok(summary)
    }
}

/// Replace `path` in one rename so a connection streaming the old page
/// keeps reading a complete file.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    use std::io::Write;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(contents)?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn prologue(out: &mut String, page: &str) {
    out.push_str(
        "<!----------------------------------------------------------------------------\n",
    );
    let _ = writeln!(out, "  {}", base_name(page));
    let _ = writeln!(out, "  Published {}", Local::now().format("%a %b %e %H:%M:%S %Y"));
    out.push_str("  Generated by codepub\n");
    out.push_str(
        "----------------------------------------------------------------------------->\n",
    );
}

fn header(out: &mut String, file: &str) {
    out.push_str("<html>\n<head>\n");
    let _ = writeln!(
        out,
        "  <link rel=\"stylesheet\" type=\"text/css\" href=\"{}\">",
        relative_link(file, STYLE_ASSET)
    );
    let _ = writeln!(
        out,
        "  <script src=\"{}\"></script>",
        relative_link(file, SCRIPT_ASSET)
    );
    out.push_str("</head>\n<body>\n");
    let _ = writeln!(out, "  <h3>{}</h3>", escape(base_name(file)));
}

fn footer(out: &mut String) {
    out.push_str("</body>\n</html>\n");
}

/// Numbered, escaped source lines with collapsible scopes.
///
/// A scope's first line gets a `[-]` toggle; at its last line a hidden
/// single-line `[+]` stand-in is emitted. The pair share an id (positive and
/// negative) so `btn(id)` in the script can swap them.
pub fn render_code(source: &str, scopes: &[Scope]) -> String {
    let mut out = String::new();
    let mut open: Vec<(Scope, usize, String)> = Vec::new();
    let mut next_id = 1usize;
    let mut scope_iter = scopes.iter().peekable();

    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        let line = escape(raw.trim_end_matches('\r'));

        // Scopes whose end was swallowed by an overlapping start
        while open.last().is_some_and(|(s, _, _)| s.end < line_no) {
            if let Some((scope, id, first)) = open.pop() {
                close_fold(&mut out, &scope, id, &first);
            }
        }

        while scope_iter.peek().is_some_and(|s| s.start < line_no) {
            scope_iter.next();
        }

        if let Some(scope) = scope_iter.next_if(|s| s.start == line_no) {
            while scope_iter.peek().is_some_and(|s| s.start == line_no) {
                scope_iter.next();
            }
            let id = next_id;
            next_id += 1;
            out.push_str("</pre>\n");
            let _ = writeln!(out, "<pre id=\"{}\" onclick=\"btn(this.id)\">", id);
            let _ = writeln!(out, "{:>3} [-]  {}", line_no, line);
            open.push((*scope, id, line));
        } else if open.last().is_some_and(|(s, _, _)| s.end == line_no) {
            let _ = writeln!(out, "{:>3}  -   {}", line_no, line);
            if let Some((scope, id, first)) = open.pop() {
                close_fold(&mut out, &scope, id, &first);
            }
        } else if !open.is_empty() {
            let _ = writeln!(out, "{:>3}  |   {}", line_no, line);
        } else {
            let _ = writeln!(out, "{:>3}      {}", line_no, line);
        }
    }

    while let Some((scope, id, first)) = open.pop() {
        close_fold(&mut out, &scope, id, &first);
    }
    out
}

fn close_fold(out: &mut String, scope: &Scope, id: usize, first_line: &str) {
    out.push_str("</pre>\n");
    let _ = writeln!(
        out,
        "<pre id=\"-{}\" style=\"display:none\" onclick=\"btn(this.id)\">",
        id
    );
    let _ = writeln!(out, "{:>3} [+]  {} ...", scope.start, first_line);
    out.push_str("</pre>\n<pre>\n");
}

/// Link from the page of `from` (a root-relative file) to `to` (also
/// root-relative).
pub fn relative_link(from: &str, to: &str) -> String {
    let from_dirs: Vec<&str> = from.split('/').collect();
    let from_dirs = &from_dirs[..from_dirs.len().saturating_sub(1)];
    let to_parts: Vec<&str> = to.split('/').collect();

    let common = from_dirs
        .iter()
        .zip(to_parts.iter())
        .take_while(|(a, b)| a == b)
        .count()
        .min(to_parts.len().saturating_sub(1));

    let mut parts: Vec<&str> = vec![".."; from_dirs.len() - common];
    parts.extend_from_slice(&to_parts[common..]);
    parts.join("/")
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Analyzer, TokenAnalyzer};
    use tempfile::TempDir;

    #[test]
    fn test_relative_link() {
        assert_eq!(relative_link("a.cpp", "template.css"), "template.css");
        assert_eq!(relative_link("src/a.cpp", "template.css"), "../template.css");
        assert_eq!(relative_link("src/a.cpp", "src/b.h.htm"), "b.h.htm");
        assert_eq!(relative_link("src/x/a.cpp", "inc/b.h.htm"), "../../inc/b.h.htm");
        assert_eq!(relative_link("index.htm", "template.js"), "template.js");
    }

    #[test]
    fn test_escape() {
        assert_eq!(
            escape("std::vector<int> a && \"b\""),
            "std::vector&lt;int&gt; a &amp;&amp; &quot;b&quot;"
        );
    }

    #[test]
    fn test_render_code_folds() {
        let source = "class A {\n  int x;\n};\nint y;\n";
        let html = render_code(source, &[Scope { start: 1, end: 3 }]);
        let expected = "</pre>\n\
<pre id=\"1\" onclick=\"btn(this.id)\">\n  1 [-]  class A {\n  2  |     int x;\n  3  -   };\n\
</pre>\n<pre id=\"-1\" style=\"display:none\" onclick=\"btn(this.id)\">\n  1 [+]  class A { ...\n\
</pre>\n<pre>\n  4      int y;\n";
        assert_eq!(html, expected);
    }

    #[test]
    fn test_render_code_nested_ids() {
        let source = "a\nb\nc\nd\ne\n";
        let html = render_code(
            source,
            &[Scope { start: 1, end: 5 }, Scope { start: 2, end: 4 }],
        );
        assert!(html.contains("<pre id=\"1\""));
        assert!(html.contains("<pre id=\"2\""));
        let inner_close = html.find("<pre id=\"-2\"").unwrap();
        let outer_close = html.find("<pre id=\"-1\"").unwrap();
        assert!(inner_close < outer_close);
    }

    #[test]
    fn test_publish_writes_pages_and_assets() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("src")).unwrap();
        fs::write(tmp.path().join("b.h"), "class Widget {\n  int<x;\n};\n").unwrap();
        fs::write(tmp.path().join("src/a.cpp"), "Widget w;\n").unwrap();

        let files = vec!["b.h".to_string(), "src/a.cpp".to_string()];
        let analysis = TokenAnalyzer::new()
            .unwrap()
            .analyze(tmp.path(), &files)
            .unwrap();
        let summary = HtmlPublisher::default().publish(tmp.path(), &analysis).unwrap();
        assert_eq!(summary.pages, 2);

        for asset in [STYLE_ASSET, SCRIPT_ASSET, INDEX_PAGE] {
            assert!(tmp.path().join(asset).is_file(), "{asset} missing");
        }

        let page = fs::read_to_string(tmp.path().join("src/a.cpp.htm")).unwrap();
        assert!(page.contains("href=\"../template.css\""));
        assert!(page.contains("<a href=\"../b.h.htm\">b.h</a>"));
        assert!(page.contains("  Published "));

        let header_page = fs::read_to_string(tmp.path().join("b.h.htm")).unwrap();
        assert!(header_page.contains("int&lt;x;"));
        assert!(header_page.contains("[-]"));

        let index = fs::read_to_string(tmp.path().join(INDEX_PAGE)).unwrap();
        assert!(index.contains("<a href=\"src/a.cpp.htm\">src/a.cpp</a>"));
    }

    #[test]
    fn test_links_escape_file_names() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("r&d.h"), "class Lab {\n  int n;\n};\n").unwrap();
        fs::write(tmp.path().join("main.cpp"), "Lab lab;\n").unwrap();

        let files = vec!["main.cpp".to_string(), "r&d.h".to_string()];
        let analysis = TokenAnalyzer::new()
            .unwrap()
            .analyze(tmp.path(), &files)
            .unwrap();
        HtmlPublisher::default().publish(tmp.path(), &analysis).unwrap();

        let index = fs::read_to_string(tmp.path().join(INDEX_PAGE)).unwrap();
        assert!(index.contains("<a href=\"r&amp;d.h.htm\">r&amp;d.h</a>"), "{index}");
        assert!(!index.contains("href=\"r&d"));

        let page = fs::read_to_string(tmp.path().join("main.cpp.htm")).unwrap();
        assert!(page.contains("<a href=\"r&amp;d.h.htm\">r&amp;d.h</a>"), "{page}");
    }
}

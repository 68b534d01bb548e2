//! Markdown to HTML for analysis display.
//!
//! Covers the subset vision models emit: ATX headings, paragraphs, bold and
//! italic, inline code, fenced code, ordered and unordered lists, block
//! quotes, rules and pipe tables. Everything else passes through as escaped
//! text. Raw HTML in the input is always escaped.

pub fn render_html(markdown: &str) -> String {
    let lines: Vec<&str> = markdown.lines().collect();
    let mut blocks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut index = 0;

    while index < lines.len() {
        let line = lines[index];
        let trimmed = line.trim();

        if trimmed.is_empty() {
            flush_paragraph(&mut paragraph, &mut blocks);
            index += 1;
            continue;
        }

        if trimmed.starts_with("```") {
            flush_paragraph(&mut paragraph, &mut blocks);
            let mut code = Vec::new();
            index += 1;
            while index < lines.len() && !lines[index].trim().starts_with("```") {
                code.push(lines[index]);
                index += 1;
            }
            index += 1;
            blocks.push(format!(
                "<pre><code>{}</code></pre>",
                escape_html(&code.join("\n"))
            ));
            continue;
        }

        if let Some((level, text)) = heading(trimmed) {
            flush_paragraph(&mut paragraph, &mut blocks);
            blocks.push(format!("<h{level}>{}</h{level}>", render_inline(text)));
            index += 1;
            continue;
        }

        if is_rule(trimmed) {
            flush_paragraph(&mut paragraph, &mut blocks);
            blocks.push("<hr>".to_string());
            index += 1;
            continue;
        }

        if trimmed.starts_with('>') {
            flush_paragraph(&mut paragraph, &mut blocks);
            let mut quoted = Vec::new();
            while index < lines.len() {
                let Some(rest) = lines[index].trim().strip_prefix('>') else {
                    break;
                };
                quoted.push(rest.strip_prefix(' ').unwrap_or(rest));
                index += 1;
            }
            blocks.push(format!(
                "<blockquote>\n{}\n</blockquote>",
                render_html(&quoted.join("\n"))
            ));
            continue;
        }

        if trimmed.contains('|') && lines.get(index + 1).is_some_and(|next| is_table_separator(next)) {
            flush_paragraph(&mut paragraph, &mut blocks);
            let header = table_cells(trimmed);
            index += 2;
            let mut rows = Vec::new();
            while index < lines.len() {
                let row = lines[index].trim();
                if row.is_empty() || !row.contains('|') {
                    break;
                }
                rows.push(table_cells(row));
                index += 1;
            }
            blocks.push(render_table(&header, &rows));
            continue;
        }

        if let Some(kind) = list_item(trimmed).map(|(kind, _)| kind) {
            flush_paragraph(&mut paragraph, &mut blocks);
            let mut items: Vec<String> = Vec::new();
            while index < lines.len() {
                let current = lines[index].trim();
                match list_item(current) {
                    Some((item_kind, text)) if item_kind == kind => {
                        items.push(text.to_string());
                    }
                    _ => {
                        let continues = !current.is_empty()
                            && lines[index].starts_with(char::is_whitespace)
                            && list_item(current).is_none();
                        match items.last_mut() {
                            Some(last) if continues => {
                                last.push(' ');
                                last.push_str(current);
                            }
                            _ => break,
                        }
                    }
                }
                index += 1;
            }
            let tag = kind.tag();
            let body = items
                .iter()
                .map(|item| format!("<li>{}</li>", render_inline(item)))
                .collect::<Vec<_>>()
                .join("\n");
            blocks.push(format!("<{tag}>\n{body}\n</{tag}>"));
            continue;
        }

        paragraph.push(trimmed);
        index += 1;
    }
    flush_paragraph(&mut paragraph, &mut blocks);
    blocks.join("\n")
}

pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Unordered,
    Ordered,
}

impl ListKind {
    fn tag(self) -> &'static str {
        match self {
            ListKind::Unordered => "ul",
            ListKind::Ordered => "ol",
        }
    }
}

fn flush_paragraph(paragraph: &mut Vec<&str>, blocks: &mut Vec<String>) {
    if paragraph.is_empty() {
        return;
    }
    blocks.push(format!("<p>{}</p>", render_inline(&paragraph.join("\n"))));
    paragraph.clear();
}

fn heading(line: &str) -> Option<(usize, &str)> {
    let level = line.chars().take_while(|ch| *ch == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &line[level..];
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    Some((level, rest.trim().trim_end_matches('#').trim_end()))
}

fn is_rule(line: &str) -> bool {
    let compact: String = line.chars().filter(|ch| !ch.is_whitespace()).collect();
    compact.len() >= 3
        && ['-', '*', '_']
            .iter()
            .any(|marker| compact.chars().all(|ch| ch == *marker))
}

fn list_item(line: &str) -> Option<(ListKind, &str)> {
    for marker in ["- ", "* ", "+ "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return Some((ListKind::Unordered, rest.trim()));
        }
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let rest = &line[digits..];
    rest.strip_prefix(". ")
        .or_else(|| rest.strip_prefix(") "))
        .map(|text| (ListKind::Ordered, text.trim()))
}

fn table_cells(row: &str) -> Vec<String> {
    let trimmed = row.trim();
    let inner = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    inner.split('|').map(|cell| cell.trim().to_string()).collect()
}

fn is_table_separator(line: &str) -> bool {
    let trimmed = line.trim();
    if !trimmed.contains('-') {
        return false;
    }
    let cells = table_cells(trimmed);
    !cells.is_empty()
        && cells.iter().all(|cell| {
            let body = cell.trim_start_matches(':').trim_end_matches(':');
            !body.is_empty() && body.chars().all(|ch| ch == '-')
        })
}

fn render_table(header: &[String], rows: &[Vec<String>]) -> String {
    let head = header
        .iter()
        .map(|cell| format!("<th>{}</th>", render_inline(cell)))
        .collect::<String>();
    let body = rows
        .iter()
        .map(|row| {
            let cells = (0..header.len())
                .map(|column| {
                    let cell = row.get(column).map(String::as_str).unwrap_or("");
                    format!("<td>{}</td>", render_inline(cell))
                })
                .collect::<String>();
            format!("<tr>{cells}</tr>")
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!("<table>\n<thead>\n<tr>{head}</tr>\n</thead>\n<tbody>\n{body}\n</tbody>\n</table>")
}

fn render_inline(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('`') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('`') else {
            break;
        };
        out.push_str(&emphasis(&escape_html(&rest[..start])));
        out.push_str("<code>");
        out.push_str(&escape_html(&after[..end]));
        out.push_str("</code>");
        rest = &after[end + 1..];
    }
    out.push_str(&emphasis(&escape_html(rest)));
    out
}

fn emphasis(escaped: &str) -> String {
    let strong = replace_delimited(escaped, "**", "strong", false);
    let strong = replace_delimited(&strong, "__", "strong", true);
    let em = replace_delimited(&strong, "*", "em", false);
    replace_delimited(&em, "_", "em", true)
}

/// Wraps `delim ... delim` runs in `<tag>`. Unmatched delimiters stay literal.
/// With `word_boundary`, delimiters inside words (snake_case) are ignored.
fn replace_delimited(text: &str, delim: &str, tag: &str, word_boundary: bool) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(delim) {
        let before = &rest[..start];
        let after_open = &rest[start + delim.len()..];
        let opens = after_open
            .chars()
            .next()
            .is_some_and(|ch| !ch.is_whitespace())
            && (!word_boundary
                || out
                    .chars()
                    .chain(before.chars())
                    .last()
                    .map_or(true, |ch| !ch.is_alphanumeric()));
        if opens {
            if let Some(end) = find_closing(after_open, delim, word_boundary) {
                out.push_str(before);
                out.push_str(&format!("<{tag}>{}</{tag}>", &after_open[..end]));
                rest = &after_open[end + delim.len()..];
                continue;
            }
        }
        out.push_str(&rest[..start + delim.len()]);
        rest = after_open;
    }
    out.push_str(rest);
    out
}

fn find_closing(text: &str, delim: &str, word_boundary: bool) -> Option<usize> {
    let mut offset = 0;
    while let Some(found) = text[offset..].find(delim) {
        let index = offset + found;
        let before_ok = index > 0 && !text[..index].ends_with(char::is_whitespace);
        let after_ok = !word_boundary
            || text[index + delim.len()..]
                .chars()
                .next()
                .map_or(true, |ch| !ch.is_alphanumeric());
        if before_ok && after_ok {
            return Some(index);
        }
        offset = index + delim.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::render_html;

    #[test]
    fn headings_and_paragraphs() {
        let html = render_html("## Observation\n\nThe left edge is hard.\nThe right dissolves.");
        assert_eq!(
            html,
            "<h2>Observation</h2>\n<p>The left edge is hard.\nThe right dissolves.</p>"
        );
    }

    #[test]
    fn emphasis_and_code() {
        let html = render_html("**Edge Contrast** pulls the eye, *quietly*, via `lost_edge` in snake_case.");
        assert_eq!(
            html,
            "<p><strong>Edge Contrast</strong> pulls the eye, <em>quietly</em>, via <code>lost_edge</code> in snake_case.</p>"
        );
    }

    #[test]
    fn lists_keep_their_kind() {
        let html = render_html("- first\n- second\n  continued\n\n1. one\n2. two");
        assert_eq!(
            html,
            "<ul>\n<li>first</li>\n<li>second continued</li>\n</ul>\n<ol>\n<li>one</li>\n<li>two</li>\n</ol>"
        );
    }

    #[test]
    fn pipe_tables_render() {
        let html = render_html("| Gate | Result |\n|---|:---:|\n| Coverage | PASS |\n| Constraint | FAIL |");
        assert!(html.starts_with("<table>"));
        assert!(html.contains("<th>Gate</th><th>Result</th>"));
        assert!(html.contains("<tr><td>Coverage</td><td>PASS</td></tr>"));
        assert!(html.contains("<tr><td>Constraint</td><td>FAIL</td></tr>"));
    }

    #[test]
    fn raw_html_is_escaped() {
        let html = render_html("<script>alert('x')</script> & more");
        assert_eq!(
            html,
            "<p>&lt;script&gt;alert(&#x27;x&#x27;)&lt;/script&gt; &amp; more</p>"
        );
    }

    #[test]
    fn unsupported_syntax_degrades_to_text() {
        let html = render_html("**unterminated and [a link](http://example.com)");
        assert_eq!(
            html,
            "<p>**unterminated and [a link](http://example.com)</p>"
        );
    }

    #[test]
    fn rules_quotes_and_fences() {
        let html = render_html("---\n> quoted *text*\n\n```\n<b>raw</b>\n```");
        assert_eq!(
            html,
            "<hr>\n<blockquote>\n<p>quoted <em>text</em></p>\n</blockquote>\n<pre><code>&lt;b&gt;raw&lt;/b&gt;</code></pre>"
        );
    }
}

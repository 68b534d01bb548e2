use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use chrono::{SecondsFormat, Utc};
use hg_contracts::session::Session;
use serde::Serialize;
use serde_json::{json, Value};

use crate::markdown::escape_html;

const FILE_STEM: &str = "hidden-grammar-analysis";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Markdown,
    Json,
    Html,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Markdown => "md",
            ExportFormat::Json => "json",
            ExportFormat::Html => "html",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "md" | "markdown" => Ok(ExportFormat::Markdown),
            "json" => Ok(ExportFormat::Json),
            "html" | "print" | "pdf" => Ok(ExportFormat::Html),
            other => bail!("unknown export format '{other}' (use md, json or html)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub session_id: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub year: Option<String>,
    pub medium: Option<String>,
    pub dimensions: Option<String>,
    pub mode: Option<String>,
    pub category: Option<String>,
    pub submode: Option<String>,
    pub exported_at: String,
}

impl ExportMetadata {
    pub fn from_session(session: &Session) -> Self {
        let field = |ids: &[&str]| {
            ids.iter()
                .find_map(|id| session.fields().get(id))
                .map(str::to_string)
        };
        let mode = session.mode();
        Self {
            session_id: session.id().to_string(),
            title: field(&["title"]),
            artist: field(&["artist", "brand", "publisher"]),
            year: field(&["year", "period", "era"]),
            medium: field(&["medium"]),
            dimensions: field(&["dimensions"]),
            mode: mode.map(|mode| mode.label.clone()),
            category: mode.map(|mode| mode.category_label.clone()),
            submode: mode.and_then(|mode| {
                session
                    .submode_id()
                    .and_then(|id| mode.submode(id))
                    .map(|submode| submode.label.clone())
            }),
            exported_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    fn rows(&self) -> Vec<(&'static str, &str)> {
        [
            ("Title", &self.title),
            ("Artist", &self.artist),
            ("Year", &self.year),
            ("Medium", &self.medium),
            ("Dimensions", &self.dimensions),
            ("Category", &self.category),
            ("Mode", &self.mode),
            ("Sub-mode", &self.submode),
        ]
        .into_iter()
        .filter_map(|(label, value)| value.as_deref().map(|value| (label, value)))
        .collect()
    }
}

/// `hidden-grammar-analysis[-<title slug>].<ext>`
pub fn export_file_name(metadata: &ExportMetadata, format: ExportFormat) -> String {
    let slug = metadata.title.as_deref().map(slugify).unwrap_or_default();
    if slug.is_empty() {
        format!("{FILE_STEM}.{}", format.extension())
    } else {
        format!("{FILE_STEM}-{slug}.{}", format.extension())
    }
}

fn slugify(value: &str) -> String {
    let mut slug = String::new();
    for ch in value.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').chars().take(60).collect::<String>().trim_end_matches('-').to_string()
}

fn ensure_analysis(session: &Session) -> Result<()> {
    if !session.has_analysis() {
        bail!("nothing to export yet; run an analysis first");
    }
    Ok(())
}

pub fn export_markdown(session: &Session) -> Result<String> {
    ensure_analysis(session)?;
    let metadata = ExportMetadata::from_session(session);
    let mut out = vec!["# Hidden Grammar Analysis".to_string()];
    let rows = metadata
        .rows()
        .into_iter()
        .map(|(label, value)| format!("- **{label}:** {value}"))
        .collect::<Vec<_>>();
    if !rows.is_empty() {
        out.push(rows.join("\n"));
    }
    for turn in session.turns() {
        out.push(format!("## {}\n\n{}", turn.heading(), turn.raw.trim()));
    }
    out.push(format!("_Exported {}_", metadata.exported_at));
    Ok(out.join("\n\n") + "\n")
}

pub fn export_json(session: &Session) -> Result<Value> {
    ensure_analysis(session)?;
    Ok(json!({
        "metadata": ExportMetadata::from_session(session),
        "fields": session.fields(),
        "lens": session.lens_id(),
        "turns": session.turns(),
    }))
}

pub fn export_print_html(session: &Session) -> Result<String> {
    ensure_analysis(session)?;
    let metadata = ExportMetadata::from_session(session);
    let title = metadata
        .title
        .clone()
        .unwrap_or_else(|| "Hidden Grammar Analysis".to_string());
    let meta_rows = metadata
        .rows()
        .into_iter()
        .map(|(label, value)| {
            format!(
                "<tr><th>{}</th><td>{}</td></tr>",
                escape_html(label),
                escape_html(value)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let image = session
        .image()
        .map(|image| {
            format!(
                "<figure><img src=\"{}\" alt=\"{}\"></figure>",
                escape_html(&image.data_url()),
                escape_html(&title)
            )
        })
        .unwrap_or_default();
    let sections = session
        .turns()
        .iter()
        .map(|turn| {
            format!(
                "<section class=\"turn\">\n<h2>{}</h2>\n{}\n</section>",
                escape_html(&turn.heading()),
                turn.html
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    Ok(format!(
        r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>{page_title}</title>
  <style>
    body {{ font-family: Georgia, "Times New Roman", serif; max-width: 760px; margin: 32px auto; color: #1b1b1b; line-height: 1.55; }}
    h1 {{ font-size: 26px; margin-bottom: 4px; }}
    .meta {{ border-collapse: collapse; margin: 16px 0 24px; }}
    .meta th {{ text-align: left; padding: 2px 16px 2px 0; color: #555; font-weight: normal; }}
    figure {{ margin: 0 0 24px; }}
    figure img {{ max-width: 100%; max-height: 420px; }}
    .turn {{ page-break-inside: avoid; border-top: 1px solid #ddd; padding-top: 12px; }}
    table {{ border-collapse: collapse; }}
    td, th {{ border: 1px solid #ccc; padding: 4px 8px; }}
    .meta td, .meta th {{ border: none; }}
    footer {{ color: #777; font-size: 12px; margin-top: 32px; }}
    @media print {{ body {{ margin: 0; }} }}
  </style>
</head>
<body>
  <h1>{page_title}</h1>
  <table class="meta">
{meta_rows}
  </table>
  {image}
{sections}
  <footer>Exported {exported_at}</footer>
</body>
</html>
"#,
        page_title = escape_html(&title),
        exported_at = escape_html(&metadata.exported_at),
    ))
}

/// Writes the export to `path`, or to a derived file name under `dir`.
pub fn write_export(
    session: &Session,
    format: ExportFormat,
    path: Option<&Path>,
    dir: &Path,
) -> Result<PathBuf> {
    let target = match path {
        Some(path) => path.to_path_buf(),
        None => dir.join(export_file_name(
            &ExportMetadata::from_session(session),
            format,
        )),
    };
    let contents = match format {
        ExportFormat::Markdown => export_markdown(session)?,
        ExportFormat::Json => serde_json::to_string_pretty(&export_json(session)?)?,
        ExportFormat::Html => export_print_html(session)?,
    };
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    fs::write(&target, contents).with_context(|| format!("failed to write {}", target.display()))?;
    Ok(target)
}

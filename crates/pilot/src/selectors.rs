//! Everything that knows what the notebook site's pages look like.
//!
//! Selectors come as ordered candidate lists: the first visible match wins.
//! When the site changes, this is the only module that should need edits.

use folio_browser::Locator;
use folio_core::{NotebookRef, SourceEntry, SourceKind};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Host the site redirects to when the stored session is no longer valid.
pub const SIGN_IN_HOST: &str = "accounts.google.com";

/// Appended to every answer so the caller keeps asking until satisfied.
pub const FOLLOW_UP_REMINDER: &str = "EXTREMELY IMPORTANT: Is that ALL you need to know? \
You can always ask another question! Think about it carefully: before you reply to the user, \
review their original request and this answer. If anything is still unclear or missing, \
ask me another comprehensive question that includes all necessary context \
(since each question opens a new browser session).";

/// Home page text that means "signed in, zero notebooks".
pub const EMPTY_HOME_MARKERS: [&str; 2] = ["Create new notebook", "New notebook"];

/// Icon ligatures rendered as text in front of source names.
const SOURCE_ICON_LINES: [&str; 7] = [
    "markdown",
    "web",
    "drive_pdf",
    "youtube",
    "video_youtube",
    "check_box",
    "check_box_outline_blank",
];

/// Source names shorter than this are UI chrome, not sources.
const MIN_SOURCE_NAME_LEN: usize = 10;

/// Header lines of an open source; the extracted text follows the last one.
const VIEWER_START_MARKERS: [&str; 2] = ["Source guide", "arrow_drop_down"];

/// The first line containing one of these ends the extracted text.
const VIEWER_END_MARKERS: [&str; 7] = [
    "tune more_vert",
    "Search results",
    "No emoji found",
    "Recently used",
    "sources The provided sources",
    "keep Save to note",
    "keyboard_arrow_down docs",
];

/// Lines containing these are page chrome inside the viewer.
const VIEWER_CHROME_LINES: [&str; 9] = [
    "Create notebook",
    "trending_up",
    "Sources Chat Studio",
    "Source guide",
    "arrow_drop_down",
    "arrow_back",
    "button_magic",
    "Google apps",
    "Google Account",
];

/// Icon ligatures that show up as whole lines.
const VIEWER_ICON_LINES: [&str; 12] = [
    "settings",
    "PRO",
    "add",
    "share",
    "arrow_forward",
    "keep",
    "keep_pin",
    "docs",
    "keyboard_arrow_down",
    "tune",
    "more_vert",
    "&nbsp;",
];

fn css(list: &[&str]) -> Vec<Locator> {
    list.iter().map(|s| Locator::css(*s)).collect()
}

fn texts(css: &str, labels: &[&str]) -> Vec<Locator> {
    labels
        .iter()
        .map(|t| Locator::css(css).with_text(*t))
        .collect()
}

// ─── Chat ─────────────────────────────────────────────────────────────

pub fn query_input() -> Vec<Locator> {
    css(&[
        "textarea.query-box-input",
        r#"textarea[aria-label="Input for queries"]"#,
        r#"textarea[aria-label="Feld für Anfragen"]"#,
    ])
}

/// Rendered answer bubbles; the last match is the newest answer.
pub fn answer_candidates() -> Vec<Locator> {
    css(&[
        ".to-user-container .message-text-content",
        "[data-message-author='bot']",
        "[data-message-author='assistant']",
    ])
}

pub fn thinking_indicator() -> Vec<Locator> {
    css(&["div.thinking-message"])
}

pub fn rate_limit_banner() -> Vec<Locator> {
    let mut out = Vec::new();
    for container in ["[role='alert']", "mat-snack-bar-container", ".error-message"] {
        for phrase in ["daily limit", "reached the limit", "rate limit", "too many"] {
            out.push(Locator::css(container).with_text(phrase));
        }
    }
    out
}

// ─── Notebook page tabs ───────────────────────────────────────────────

pub fn sources_tab() -> Vec<Locator> {
    let mut out = texts("[role='tab']", &["Sources"]);
    out.extend(texts("button", &["Sources"]));
    out
}

pub fn all_notebooks_tab() -> Vec<Locator> {
    let mut out = texts("[role='tab']", &["All"]);
    out.extend(texts("button", &["All"]));
    out
}

// ─── Adding sources ───────────────────────────────────────────────────

pub fn add_source_button() -> Vec<Locator> {
    let mut out = css(&[
        r#"button[aria-label="Add source"]"#,
        r#"button[aria-label="Add sources"]"#,
        r#"[data-test-id="add-source-button"]"#,
    ]);
    out.extend(texts("button", &["Add source"]));
    out
}

pub fn website_option() -> Vec<Locator> {
    let mut out = css(&[
        r#"[data-source-type="website"]"#,
        r#"[data-source-type="link"]"#,
    ]);
    out.extend(texts("button", &["Websites", "Website"]));
    out.extend(texts("mat-chip, [role='option'], li", &["Websites", "Website"]));
    out
}

pub fn youtube_option() -> Vec<Locator> {
    let mut out = css(&[r#"[data-source-type="youtube"]"#]);
    out.extend(texts("button", &["YouTube"]));
    out.extend(texts("mat-chip, [role='option'], li", &["YouTube"]));
    out
}

pub fn upload_option() -> Vec<Locator> {
    let mut out = css(&[r#"[data-source-type="upload"]"#]);
    out.extend(texts("button", &["Upload", "choose file"]));
    out
}

pub fn file_input() -> Vec<Locator> {
    css(&["input[type='file']"])
}

pub fn url_input() -> Vec<Locator> {
    css(&[
        r#"textarea[placeholder*="Paste"]"#,
        r#"input[placeholder*="Paste"]"#,
        r#"textarea[formcontrolname]"#,
        "input[type='url']",
    ])
}

pub fn insert_button() -> Vec<Locator> {
    let mut out = css(&[r#"[data-test-id="submit-source"]"#]);
    out.extend(texts("button", &["Insert", "Submit"]));
    out
}

pub fn upload_error() -> Vec<Locator> {
    css(&[".error-message", r#"[role="alert"]"#])
}

pub fn upload_in_progress() -> Vec<Locator> {
    css(&[
        ".loading",
        ".spinner",
        r#"[aria-busy="true"]"#,
        "mat-progress-spinner",
    ])
}

// ─── Source rows ──────────────────────────────────────────────────────

/// Container of one source in the sources panel, by (partial) name.
pub fn source_row(name: &str) -> Vec<Locator> {
    [
        ".single-source-container",
        "[class*='source-item']",
        "[data-source-url]",
    ]
    .iter()
    .map(|c| Locator::css(*c).with_text(name))
    .collect()
}

pub fn source_checkbox(name: &str) -> Vec<Locator> {
    source_row(name)
        .into_iter()
        .map(|row| Locator::css("mat-checkbox").within(row))
        .collect()
}

pub fn source_more_button(name: &str) -> Vec<Locator> {
    let mut out = Vec::new();
    for row in source_row(name) {
        out.push(Locator::css("button[aria-label*='More']").within(row.clone()));
        out.push(Locator::css("button[aria-label*='Options']").within(row.clone()));
        out.push(Locator::css("button").with_text("more_vert").within(row));
    }
    out
}

/// Clickable name inside a source row; opens the source viewer.
pub fn source_title(name: &str) -> Vec<Locator> {
    let mut out = Vec::new();
    for row in source_row(name) {
        out.push(Locator::css(".source-title").within(row.clone()));
        out.push(Locator::css("[class*='source-title']").within(row.clone()));
    }
    out.extend(source_row(name));
    out
}

/// Panel showing the text of one opened source.
pub fn source_viewer() -> Vec<Locator> {
    css(&[
        "[class*='source-viewer']",
        "[class*='source-detail']",
        "[class*='source-content']",
        "[class*='document-viewer']",
    ])
}

pub fn remove_menu_item() -> Vec<Locator> {
    let mut out = texts("[role='menuitem']", &["Delete", "Remove"]);
    out.extend(texts("button", &["Remove source", "Delete source"]));
    out
}

// ─── Dialogs ──────────────────────────────────────────────────────────

pub fn dialog() -> Vec<Locator> {
    css(&["mat-dialog-container", "[role='dialog']"])
}

pub fn confirm_button() -> Vec<Locator> {
    let mut out = css(&[r#"[data-test-id="confirm-delete"]"#]);
    for d in dialog() {
        for label in ["Delete", "Confirm", "Yes", "OK"] {
            out.push(Locator::css("button").with_text(label).within(d.clone()));
        }
    }
    out
}

// ─── Notebooks on the home page ───────────────────────────────────────

pub fn notebook_cards() -> Vec<Locator> {
    css(&["project-button", "a[href*='/notebook/']"])
}

pub fn notebook_card(id: &str) -> Vec<Locator> {
    vec![Locator::css(format!(
        "project-button:has(button[aria-labelledby*='project-{}-'])",
        id
    ))]
}

pub fn notebook_more_button(id: &str) -> Vec<Locator> {
    let mut out = Vec::new();
    for card in notebook_card(id) {
        out.push(Locator::css("button[aria-label*='More']").within(card.clone()));
        out.push(Locator::css("button.project-button-more").within(card.clone()));
        out.push(Locator::css("button").with_text("more_vert").within(card));
    }
    out
}

pub fn delete_menu_item() -> Vec<Locator> {
    let mut out = texts("[role='menuitem']", &["Delete"]);
    out.extend(css(&[r#"[data-test-id="delete-notebook"]"#]));
    out
}

pub fn new_notebook_button() -> Vec<Locator> {
    let mut out = css(&[
        r#"[aria-label="Create new notebook"]"#,
        r#"[aria-label="New notebook"]"#,
        r#"[data-test-id="create-notebook"]"#,
    ]);
    out.extend(texts("button", &["New notebook", "Create new"]));
    out
}

pub fn title_input() -> Vec<Locator> {
    css(&["input.title-input", "editable-project-title input"])
}

pub fn page_body() -> Locator {
    Locator::css("body")
}

/// Collects the cards on the home page as `{id, name, subtitle: [..]}`.
pub const NOTEBOOK_CARDS_JS: &str = r#"/* folio:notebook-cards */ (function() {
  const out = [];
  for (const card of document.querySelectorAll('project-button')) {
    if (card.closest('.featured-project-card')) continue;
    const button = card.querySelector('button[aria-labelledby]');
    const labelled = button ? button.getAttribute('aria-labelledby') || '' : '';
    const title = card.querySelector('.project-button-title');
    const parts = Array.from(card.querySelectorAll('.project-button-subtitle-part'))
      .map(e => (e.innerText || '').trim()).filter(Boolean);
    out.push({
      labelledby: labelled,
      name: title ? (title.innerText || '').trim() : '',
      subtitle: parts,
    });
  }
  for (const link of document.querySelectorAll("a[href*='/notebook/']")) {
    out.push({ href: link.href, name: (link.innerText || '').trim().split('\n')[0] || '' });
  }
  return out;
})()"#;

/// Scrolls the sources panel one step; returns whether anything scrolled.
pub const SCROLL_SOURCES_JS: &str = r#"/* folio:scroll-sources */ (function() {
  const containers = [
    document.querySelector('source-selector'),
    document.querySelector('mat-sidenav-content'),
    document.querySelector('[class*="source-list"]'),
    document.querySelector('[class*="sources-container"]'),
  ];
  for (const c of containers) {
    if (c && c.scrollHeight > c.clientHeight) { c.scrollTop += 500; return true; }
  }
  return false;
})()"#;

/// Scrolls the open source viewer one step; returns whether anything scrolled.
pub const SCROLL_VIEWER_JS: &str = r#"/* folio:scroll-viewer */ (function() {
  const containers = [
    document.querySelector('[class*="source-viewer"]'),
    document.querySelector('[class*="source-detail"]'),
    document.querySelector('[class*="source-content"]'),
    document.querySelector('mat-sidenav-content'),
  ];
  for (const c of containers) {
    if (c && c.scrollTop + c.clientHeight < c.scrollHeight) { c.scrollTop += 1000; return true; }
  }
  return false;
})()"#;

static PROJECT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"project-([A-Za-z0-9-]+?)-(?:title|emoji|subtitle)").expect("valid project id regex"));

static SOURCE_COUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\d+)\s+sources?$").expect("valid source count regex"));

/// Turn the raw card list into notebook references, deduplicated by URL.
pub fn parse_notebook_cards(raw: &Value, notebook_url: impl Fn(&str) -> String) -> Vec<NotebookRef> {
    let mut out: Vec<NotebookRef> = Vec::new();
    let cards = match raw.as_array() {
        Some(c) => c,
        None => return out,
    };

    for card in cards {
        let id = if let Some(labelled) = card.get("labelledby").and_then(|v| v.as_str()) {
            PROJECT_ID_RE
                .captures(labelled)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        } else {
            card.get("href")
                .and_then(|v| v.as_str())
                .and_then(folio_core::notebook_id_from_url)
        };
        let id = match id {
            Some(id) => id,
            None => continue,
        };
        let url = notebook_url(&id);
        if out.iter().any(|n| n.url == url) {
            continue;
        }

        let name = card
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Notebook {}", id.chars().take(8).collect::<String>()));

        let subtitle: Vec<&str> = card
            .get("subtitle")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        let source_count = subtitle.iter().find_map(|p| parse_source_count(p));
        let last_modified = subtitle
            .iter()
            .find(|p| parse_source_count(p).is_none())
            .map(|s| s.to_string());

        out.push(NotebookRef {
            id,
            name,
            url,
            source_count,
            last_modified,
        });
    }
    out
}

pub fn parse_source_count(text: &str) -> Option<u32> {
    SOURCE_COUNT_RE
        .captures(text.trim())
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Extract sources from the rendered page text of an open sources panel.
///
/// Names follow the "Select all" row; each is preceded by an icon ligature
/// line that gives its kind. Parsing stops at the next panel heading.
pub fn parse_sources_panel(body_text: &str) -> Vec<SourceEntry> {
    let lines: Vec<&str> = body_text.lines().collect();
    let start = match lines
        .iter()
        .position(|l| l.to_lowercase().contains("select all"))
    {
        Some(i) => i + 1,
        None => return Vec::new(),
    };

    let mut sources: Vec<SourceEntry> = Vec::new();
    let mut previous = "";
    for raw in &lines[start..] {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let lower = line.to_lowercase();
        if lower == "chat" || lower == "studio" || lower == "add sources" || lower.contains("notebook guide") {
            break;
        }
        if SOURCE_ICON_LINES.contains(&lower.as_str())
            || lower.starts_with("video_")
            || lower.starts_with("drive_")
        {
            previous = line;
            continue;
        }
        if line.chars().count() > MIN_SOURCE_NAME_LEN
            && !sources.iter().any(|s| s.name.eq_ignore_ascii_case(line))
        {
            let kind = match SourceKind::from_icon(previous) {
                SourceKind::Unknown => SourceKind::Document,
                k => k,
            };
            sources.push(SourceEntry {
                name: line.to_string(),
                kind,
                active: None,
            });
        }
        previous = line;
    }
    sources
}

/// Whether page text shows an opened source.
pub fn is_source_view(text: &str) -> bool {
    text.lines().any(|l| l.trim() == VIEWER_START_MARKERS[0])
}

/// Strip viewer chrome from the text of an opened source.
///
/// The content starts after the last header marker or, when the header is
/// missing, after the first line naming the source. It ends at the first
/// footer marker. Blank runs collapse to one empty line.
pub fn clean_source_content(raw: &str, source_name: &str) -> String {
    let lines: Vec<&str> = raw.lines().collect();

    let header = lines
        .iter()
        .rposition(|l| VIEWER_START_MARKERS.contains(&l.trim()));
    let start = match header {
        Some(i) => i + 1,
        None => {
            let needle = source_name.trim().to_lowercase();
            let needle = needle.strip_suffix(".md").unwrap_or(&needle).to_string();
            if needle.is_empty() {
                0
            } else {
                lines
                    .iter()
                    .position(|l| l.to_lowercase().contains(&needle))
                    .map(|i| i + 1)
                    .unwrap_or(0)
            }
        }
    };
    let end = lines
        .iter()
        .enumerate()
        .skip(start)
        .find(|(_, l)| VIEWER_END_MARKERS.iter().any(|m| l.contains(m)))
        .map(|(i, _)| i)
        .unwrap_or(lines.len());

    let mut out: Vec<String> = Vec::new();
    for raw_line in &lines[start.min(end)..end] {
        let line = raw_line.trim();
        if line.is_empty() {
            if out.last().map(|l| !l.is_empty()).unwrap_or(false) {
                out.push(String::new());
            }
            continue;
        }
        if VIEWER_CHROME_LINES.iter().any(|m| line.contains(m)) || VIEWER_ICON_LINES.contains(&line) {
            continue;
        }
        // One or two characters are leftover glyphs unless they are a number
        let starts_with_digit = line.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false);
        if line.chars().count() < 3 && !starts_with_digit {
            continue;
        }
        out.push(
            line.replace("&nbsp;", " ")
                .replace("&lt;", "<")
                .replace("&gt;", ">")
                .replace("&amp;", "&"),
        );
    }
    while out.last().map(|l| l.is_empty()).unwrap_or(false) {
        out.pop();
    }
    out.join("\n")
}

/// Whether the home page says there are no notebooks yet.
pub fn is_empty_home(body_text: &str) -> bool {
    EMPTY_HOME_MARKERS.iter().any(|m| body_text.contains(m))
}

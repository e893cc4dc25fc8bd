
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::fmt::Write;
use std::sync::LazyLock;
use tracing::debug;

/// Minimum length of a main-content block worth keeping
const MIN_BLOCK_CHARS: usize = 20;

static REMOVED: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("script, style, noscript, iframe, object, embed").expect("valid selector")
});
static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid selector"));
static META_DESCRIPTION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[name="description"]"#).expect("valid selector"));
static NAVIGATION: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("nav, .nav, .navbar, .navigation, .menu").expect("valid selector")
});
static MAIN_CANDIDATES: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        "main",
        r#"[role="main"]"#,
        ".main-content",
        ".content",
        "#content",
        "article",
        "section",
        ".container",
        "body",
    ]
    .iter()
    .map(|s| Selector::parse(s).expect("valid selector"))
    .collect()
});
static HEADINGS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, h3, h4, h5, h6").expect("valid selector"));
static TEXT_BLOCKS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("p, div, span, li, td, th, blockquote, pre").expect("valid selector")
});
static LINKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));
static IMAGES: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img[alt]").expect("valid selector"));
static INTERACTIVE: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("form, input, textarea, button, select").expect("valid selector")
});

/// Convert a rendered HTML snapshot into sectioned plain text.
///
/// The output always follows the same order: page title, description,
/// navigation, headings, main content, links, images and interactive
/// elements. Sections other than main content are omitted when the page has
/// no matching elements.
#[inline]
pub fn structure_page(html: &str) -> String {
    let mut document = Html::parse_document(html);
    remove_elements(&mut document, &REMOVED);

    let mut out = String::new();

    if let Some(title) = document
        .select(&TITLE)
        .next()
        .map(text_of)
        .filter(|t| !t.is_empty())
    {
        let _ = writeln!(out, "Page Title: {}", title);
    }

    if let Some(description) = document
        .select(&META_DESCRIPTION)
        .next()
        .and_then(|meta| meta.value().attr("content"))
    {
        let _ = writeln!(out, "Description: {}", collapse(description));
    }

    let navigation: Vec<String> = document
        .select(&NAVIGATION)
        .map(text_of)
        .filter(|t| !t.is_empty())
        .collect();
    if !navigation.is_empty() {
        out.push_str("\n=== NAVIGATION ===\n");
        for nav in navigation {
            push_line(&mut out, &nav);
        }
    }

    let main = MAIN_CANDIDATES
        .iter()
        .find_map(|selector| document.select(selector).next())
        .unwrap_or_else(|| document.root_element());

    push_headings(&mut out, main);
    push_main_content(&mut out, main);
    push_links(&mut out, main);
    push_images(&mut out, main);
    push_interactive(&mut out, main, &document);

    debug!("Structured page into {} chars", out.len());
    out
}

fn push_headings(out: &mut String, main: ElementRef<'_>) {
    let mut headings = main.select(&HEADINGS).peekable();
    if headings.peek().is_none() {
        return;
    }

    out.push_str("\n=== HEADINGS ===\n");
    for heading in headings {
        let text = text_of(heading);
        if text.is_empty() {
            continue;
        }
        let tag = heading.value().name().to_uppercase();
        let _ = write!(out, "\n{}: {}\n", tag, text);
    }
}

fn push_main_content(out: &mut String, main: ElementRef<'_>) {
    out.push_str("\n=== MAIN CONTENT ===\n");

    let mut kept: Vec<String> = Vec::new();
    for block in main.select(&TEXT_BLOCKS) {
        let text = text_of(block);
        if text.chars().count() < MIN_BLOCK_CHARS {
            continue;
        }
        let overlaps_kept = kept
            .iter()
            .any(|existing| existing.contains(text.as_str()) || text.contains(existing.as_str()));
        if overlaps_kept {
            continue;
        }
        push_line(out, &text);
        kept.push(text);
    }
}

fn push_links(out: &mut String, main: ElementRef<'_>) {
    let mut links = main.select(&LINKS).peekable();
    if links.peek().is_none() {
        return;
    }

    out.push_str("\n=== LINKS ===\n");
    let mut seen = HashSet::new();
    for link in links {
        let text = text_of(link);
        let href = link.value().attr("href").unwrap_or_default().trim();
        if text.is_empty() || href.is_empty() {
            continue;
        }
        let entry = format!("{} -> {}", text, href);
        if seen.insert(entry.clone()) {
            push_line(out, &entry);
        }
    }
}

fn push_images(out: &mut String, main: ElementRef<'_>) {
    let mut images = main.select(&IMAGES).peekable();
    if images.peek().is_none() {
        return;
    }

    out.push_str("\n=== IMAGES ===\n");
    for image in images {
        let alt = image.value().attr("alt").map(collapse).unwrap_or_default();
        if alt.is_empty() {
            continue;
        }
        let src = image.value().attr("src").unwrap_or("No source");
        let _ = writeln!(out, "Image: {} ({})", alt, src);
    }
}

fn push_interactive(out: &mut String, main: ElementRef<'_>, document: &Html) {
    let mut controls = main.select(&INTERACTIVE).peekable();
    if controls.peek().is_none() {
        return;
    }

    out.push_str("\n=== INTERACTIVE ELEMENTS ===\n");
    for control in controls {
        let element = control.value();
        let label = Some(text_of(control))
            .filter(|t| !t.is_empty())
            .or_else(|| non_empty_attr(control, "placeholder"))
            .or_else(|| non_empty_attr(control, "value"))
            .or_else(|| non_empty_attr(control, "aria-label"))
            .or_else(|| {
                element
                    .id()
                    .and_then(|id| label_for(document, id))
                    .filter(|t| !t.is_empty())
            });
        let control_type = element.attr("type");
        let name = element.attr("name");

        if label.is_none() && control_type.is_none() && name.is_none() {
            continue;
        }

        let mut line = element.name().to_uppercase();
        if let Some(control_type) = control_type {
            let _ = write!(line, " ({})", control_type);
        }
        if let Some(name) = name {
            let _ = write!(line, " [{}]", name);
        }
        if let Some(label) = label {
            let _ = write!(line, ": {}", label);
        }
        push_line(out, &line);
    }
}

fn label_for(document: &Html, id: &str) -> Option<String> {
    let selector = Selector::parse(&format!(r#"label[for="{}"]"#, id)).ok()?;
    document.select(&selector).next().map(text_of)
}

fn non_empty_attr(element: ElementRef<'_>, attr: &str) -> Option<String> {
    element
        .value()
        .attr(attr)
        .map(collapse)
        .filter(|value| !value.is_empty())
}

/// Text content of an element with whitespace runs collapsed
fn text_of(element: ElementRef<'_>) -> String {
    collapse(&element.text().collect::<String>())
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    if !line.ends_with('\n') {
        out.push('\n');
    }
}

fn remove_elements(document: &mut Html, selector: &Selector) {
    let node_ids: Vec<_> = document.select(selector).map(|element| element.id()).collect();

    for node_id in node_ids {
        if let Some(mut node) = document.tree.get_mut(node_id) {
            node.detach();
        }
    }
}

//! HTML extraction helpers for the router console
//!
//! Pure functions over a parsed document (`scraper::Html`). The console has
//! no stable markup contract, so these helpers stay deliberately small and
//! literal: exact attribute matches, positional table columns.

use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node};

use super::{Forward, RouterError};

/// Class attribute of the table that renders existing forwards.
pub const FORWARD_TABLE_CLASS: &str = "grid table100";

const ERROR_ICON_ID: &str = "error-message-icon";
const ERROR_ICON_SRC: &str = "/images/icon_error.png";
const ERROR_TEXT_ID: &str = "error-message-text";

// ============================================================================
// Tree walking
// ============================================================================

/// First element (including `root`) whose `id` equals `id`.
pub fn find_element_by_id<'a>(root: ElementRef<'a>, id: &str) -> Option<ElementRef<'a>> {
    find_element_by_attr(root, "id", id)
}

/// First element (including `root`) carrying `attribute="value"` exactly.
pub fn find_element_by_attr<'a>(
    root: ElementRef<'a>,
    attribute: &str,
    value: &str,
) -> Option<ElementRef<'a>> {
    root.descendants()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().attr(attribute) == Some(value))
}

/// First `<table>` whose whole `class` attribute equals `class`.
pub fn find_table_by_class<'a>(root: ElementRef<'a>, class: &str) -> Option<ElementRef<'a>> {
    root.descendants()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "table" && el.value().attr("class") == Some(class))
}

/// All elements named `tag` below `root`, in document order.
///
/// Matched elements are not searched further: a row's cells are found by a
/// second call on the row, not by this one.
pub fn find_elements<'a>(root: ElementRef<'a>, tag: &str) -> Vec<ElementRef<'a>> {
    let mut results = Vec::new();
    collect_elements(root, tag, &mut results);
    results
}

fn collect_elements<'a>(node: ElementRef<'a>, tag: &str, results: &mut Vec<ElementRef<'a>>) {
    if node.value().name() == tag {
        results.push(node);
        return;
    }
    for child in node.children().filter_map(ElementRef::wrap) {
        collect_elements(child, tag, results);
    }
}

/// Concatenated text of everything below `node`.
///
/// An `<input>` contributes its `name` attribute instead of text. Listing
/// rows carry their delete identifier only as the name of the delete
/// button, so this is how that column reads as a value.
pub fn text_content(node: ElementRef<'_>) -> String {
    let mut text = String::new();
    push_text(node, &mut text);
    text
}

fn push_text(node: ElementRef<'_>, text: &mut String) {
    for child in node.children() {
        match child.value() {
            Node::Text(t) => text.push_str(t),
            Node::Element(el) if el.name() == "input" => {
                if let Some(name) = el.attr("name") {
                    text.push_str(name);
                }
            }
            Node::Element(_) => {
                if let Some(el) = ElementRef::wrap(child) {
                    push_text(el, text);
                }
            }
            _ => {}
        }
    }
}

// ============================================================================
// Raw markup
// ============================================================================

fn nonce_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"name="nonce"[^>]*value="([^"]+)""#).expect("nonce pattern is valid")
    })
}

/// Value of the hidden `nonce` input, matched on the raw markup.
pub fn extract_nonce(html: &str) -> Option<String> {
    nonce_regex()
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

// ============================================================================
// Console pages
// ============================================================================

/// Split a ports cell into `(ports, device_port)`.
///
/// The cell holds the external port, optionally followed by the internal
/// port after `->`, `→` or `to`. Without a separator the device port is
/// empty.
pub fn split_ports_cell(cell: &str) -> (String, String) {
    let cell = cell.trim();
    for sep in ["->", "→", " to "] {
        if let Some((ext, int)) = cell.split_once(sep) {
            return (ext.trim().to_string(), int.trim().to_string());
        }
    }
    (cell.to_string(), String::new())
}

/// Convert the forward table's rows into observed forwards.
///
/// The first row is the header. Columns are positional: device, public IP,
/// service name, ports, delete field.
pub fn parse_forward_rows(table: ElementRef<'_>) -> Result<Vec<Forward>, RouterError> {
    let mut forwards = Vec::new();
    for (i, row) in find_elements(table, "tr").into_iter().enumerate().skip(1) {
        let cells: Vec<String> = find_elements(row, "td")
            .into_iter()
            .map(|cell| text_content(cell).trim().to_string())
            .collect();

        if cells.len() < 5 {
            return Err(RouterError::Parse(format!(
                "forward table row {} has {} cells, expected 5",
                i,
                cells.len()
            )));
        }

        let (ports, device_port) = split_ports_cell(&cells[3]);
        let delete_id = Some(cells[4].clone()).filter(|id| !id.is_empty());

        forwards.push(Forward {
            device_name: cells[0].clone(),
            public_ip: cells[1].clone(),
            service_name: cells[2].clone(),
            ports,
            device_port,
            delete_id,
        });
    }
    Ok(forwards)
}

/// Parse the forward table out of a full page.
///
/// A missing table is a `Parse` error (usually an unauthenticated session
/// being served the login page). A table with only a header is an empty,
/// successful result.
pub fn parse_forward_table(html: &str) -> Result<Vec<Forward>, RouterError> {
    let doc = Html::parse_document(html);
    let table = find_table_by_class(doc.root_element(), FORWARD_TABLE_CLASS).ok_or_else(|| {
        RouterError::Parse(format!(
            "could not find table with class '{}'",
            FORWARD_TABLE_CLASS
        ))
    })?;
    parse_forward_rows(table)
}

/// Error message shown on a result page, if the page carries an error banner.
pub fn extract_error_banner(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let root = doc.root_element();

    let has_icon = find_element_by_id(root, ERROR_ICON_ID).is_some()
        || root
            .descendants()
            .filter_map(ElementRef::wrap)
            .any(|el| el.value().name() == "img" && el.value().attr("src") == Some(ERROR_ICON_SRC));
    if !has_icon {
        return None;
    }

    let message = find_element_by_id(root, ERROR_TEXT_ID)
        .map(|el| text_content(el).trim().to_string())
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| "unknown error".to_string());
    Some(message)
}

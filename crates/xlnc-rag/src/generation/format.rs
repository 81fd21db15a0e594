//! Paragraph normalization for generated answers

use once_cell::sync::Lazy;
use regex::Regex;

static NUMBERED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.").expect("valid list regex"));

fn is_list_item(line: &str) -> bool {
    line.starts_with('•') || line.starts_with('-') || line.starts_with('*') || NUMBERED.is_match(line)
}

/// Short lines ending in a colon, or made only of upper-case letters
fn is_header(line: &str) -> bool {
    line.chars().count() < 50 && (line.ends_with(':') || line.chars().all(char::is_uppercase))
}

/// Regroup raw model output into paragraphs separated by blank lines.
///
/// List items and headers stand alone. Other lines are joined with spaces
/// until one ends a sentence.
pub fn format_paragraphs(text: &str) -> String {
    let mut blocks: Vec<String> = Vec::new();
    let mut paragraph = String::new();

    let flush = |paragraph: &mut String, blocks: &mut Vec<String>| {
        if !paragraph.is_empty() {
            blocks.push(paragraph.trim().to_string());
            paragraph.clear();
        }
    };

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if is_list_item(line) || is_header(line) {
            flush(&mut paragraph, &mut blocks);
            blocks.push(line.to_string());
            continue;
        }

        if !paragraph.is_empty() {
            paragraph.push(' ');
        }
        paragraph.push_str(line);

        if line.ends_with('.') || line.ends_with('!') || line.ends_with('?') {
            flush(&mut paragraph, &mut blocks);
        }
    }
    flush(&mut paragraph, &mut blocks);

    blocks.join("\n\n")
}

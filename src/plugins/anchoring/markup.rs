//! Minimal HTML fragment reader/writer for rendered message bodies.
//!
//! Only what rendered chat markup needs: nested tags, attributes, void elements, comments and
//! the common entities. It is not a conforming HTML parser.

use super::tree::{ContentTree, Element, NodeId, NodeKind};
use super::AnchorError;

const VOID_TAGS: &[&str] = &[
    "area", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

pub fn is_void_tag(tag: &str) -> bool {
    VOID_TAGS.contains(&tag)
}

/// Parse `markup` into a tree whose root is `root`.
pub fn parse_into(root: Element, markup: &str) -> Result<ContentTree, AnchorError> {
    let mut tree = ContentTree::new(root);
    let mut stack: Vec<(String, NodeId)> = Vec::new();
    let mut rest = markup;

    while !rest.is_empty() {
        let current = stack.last().map(|(_, id)| *id).unwrap_or(tree.root());

        if let Some(after) = rest.strip_prefix("<!--") {
            let end = after
                .find("-->")
                .ok_or_else(|| AnchorError::markup("unterminated comment"))?;
            rest = &after[end + 3..];
            continue;
        }

        if let Some(after) = rest.strip_prefix("</") {
            let end = after
                .find('>')
                .ok_or_else(|| AnchorError::markup("unterminated closing tag"))?;
            let name = after[..end].trim().to_ascii_lowercase();
            rest = &after[end + 1..];

            if is_void_tag(&name) {
                continue;
            }
            let Some(position) = stack.iter().rposition(|(tag, _)| *tag == name) else {
                return Err(AnchorError::markup(format!("unexpected closing tag </{name}>")));
            };
            stack.truncate(position);
            continue;
        }

        if rest.starts_with('<') && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic()) {
            let end = tag_end(rest).ok_or_else(|| AnchorError::markup("unterminated tag"))?;
            let body = &rest[1..end];
            rest = &rest[end + 1..];

            let self_closing = body.trim_end().ends_with('/');
            let body = body.trim_end().trim_end_matches('/');
            let element = parse_open_tag(body)?;
            let is_void = is_void_tag(&element.tag);
            let tag = element.tag.clone();
            let id = tree.append_element(current, element);
            if !self_closing && !is_void {
                stack.push((tag, id));
            }
            continue;
        }

        let end = rest
            .char_indices()
            .skip(1)
            .find(|(_, c)| *c == '<')
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let text = decode_entities(&rest[..end]);
        rest = &rest[end..];
        if !text.is_empty() {
            tree.append_text(current, text);
        }
    }

    Ok(tree)
}

/// Parse a message body with the conventional `div.mes_text` root.
pub fn parse_fragment(markup: &str) -> Result<ContentTree, AnchorError> {
    parse_into(Element::new("div").with_class("mes_text"), markup)
}

/// Serialize the children of `id`, e.g. to write a decorated message back to the host.
pub fn inner_markup(tree: &ContentTree, id: NodeId) -> String {
    let mut out = String::new();
    for child in tree.children(id) {
        write_node(tree, *child, &mut out);
    }
    out
}

fn write_node(tree: &ContentTree, id: NodeId, out: &mut String) {
    match tree.kind(id) {
        Some(NodeKind::Text(text)) => out.push_str(&escape_text(text)),
        Some(NodeKind::Element(element)) => {
            out.push('<');
            out.push_str(&element.tag);
            if !element.classes.is_empty() {
                out.push_str(" class=\"");
                out.push_str(&escape_attr(&element.classes.join(" ")));
                out.push('"');
            }
            for (name, value) in &element.attrs {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                out.push_str(&escape_attr(value));
                out.push('"');
            }
            out.push('>');
            if is_void_tag(&element.tag) {
                return;
            }
            for child in tree.children(id) {
                write_node(tree, *child, out);
            }
            out.push_str("</");
            out.push_str(&element.tag);
            out.push('>');
        }
        None => {}
    }
}

fn tag_end(input: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in input.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '>') => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_open_tag(body: &str) -> Result<Element, AnchorError> {
    let body = body.trim();
    let name_end = body
        .find(|c: char| c.is_whitespace())
        .unwrap_or(body.len());
    let name = &body[..name_end];
    if name.is_empty() {
        return Err(AnchorError::markup("empty tag name"));
    }

    let mut element = Element::new(name);
    let mut rest = body[name_end..].trim_start();

    while !rest.is_empty() {
        let key_end = rest
            .find(|c: char| c == '=' || c.is_whitespace())
            .unwrap_or(rest.len());
        let key = rest[..key_end].to_ascii_lowercase();
        rest = rest[key_end..].trim_start();

        let value = if let Some(after_eq) = rest.strip_prefix('=') {
            let after_eq = after_eq.trim_start();
            match after_eq.chars().next() {
                Some(q @ ('"' | '\'')) => {
                    let inner = &after_eq[1..];
                    let close = inner
                        .find(q)
                        .ok_or_else(|| AnchorError::markup("unterminated attribute value"))?;
                    rest = inner[close + 1..].trim_start();
                    decode_entities(&inner[..close])
                }
                _ => {
                    let end = after_eq
                        .find(|c: char| c.is_whitespace())
                        .unwrap_or(after_eq.len());
                    rest = after_eq[end..].trim_start();
                    decode_entities(&after_eq[..end])
                }
            }
        } else {
            String::new()
        };

        if key.is_empty() {
            break;
        }
        if key == "class" {
            element
                .classes
                .extend(value.split_whitespace().map(str::to_string));
        } else {
            element.attrs.insert(key, value);
        }
    }

    Ok(element)
}

fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let candidate = &rest[amp..];
        let semi = candidate
            .char_indices()
            .take(12)
            .find(|(_, c)| *c == ';')
            .map(|(i, _)| i);
        let Some(semi) = semi else {
            out.push('&');
            rest = &candidate[1..];
            continue;
        };
        let entity = &candidate[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" | "#39" => Some('\''),
            "nbsp" => Some('\u{a0}'),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &candidate[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_markup() {
        let src = "<p>Hello <b class=\"x y\">bold</b> text</p><p>Second<br>line</p>";
        let tree = parse_fragment(src).unwrap();
        assert_eq!(inner_markup(&tree, tree.root()), src);
    }

    #[test]
    fn test_entities_and_comments() {
        let tree = parse_fragment("<p>a &amp; b &lt;c&gt;<!-- hidden --> &#65;&#x42;</p>").unwrap();
        assert_eq!(tree.text_content(tree.root()), "a & b <c> AB");
    }

    #[test]
    fn test_self_closing_and_void_tags() {
        let tree = parse_fragment("<p>x<br/>y<img src=\"a.png\">z</p>").unwrap();
        let p = tree.children(tree.root())[0];
        assert_eq!(tree.children(p).len(), 5);
        let img = tree.find_element(tree.root(), |e| e.tag == "img").unwrap();
        assert_eq!(tree.element(img).unwrap().attr("src"), Some("a.png"));
    }

    #[test]
    fn test_unexpected_closing_tag_is_error() {
        assert!(matches!(
            parse_fragment("<p>x</div>"),
            Err(AnchorError::Markup { .. })
        ));
    }

    #[test]
    fn test_lone_angle_bracket_is_text() {
        let tree = parse_fragment("<p>1 < 2</p>").unwrap();
        assert_eq!(tree.text_content(tree.root()), "1 < 2");
    }
}

//! CSS rule-block location and declaration-level patching.
//!
//! Blocks are found by scanning the stylesheet while respecting comments,
//! strings and at-rule nesting. A patch only rewrites declarations inside the
//! chosen block body; the selector and braces are carried over byte for byte,
//! and the `find` anchor is always an exact substring of the input.

use std::collections::{BTreeMap, BTreeSet};

use crate::action::PatchEdit;

/// One `selector { ... }` rule in a stylesheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CssBlock {
    /// Selector after whitespace normalization.
    pub selector: String,
    /// Byte offset of the first selector character.
    pub start: usize,
    /// Byte offset of `{`.
    pub open: usize,
    /// Byte offset of the matching `}`.
    pub close: usize,
    /// Inside an at-rule group such as `@media`.
    pub nested: bool,
}

impl CssBlock {
    pub fn end(&self) -> usize {
        self.close + 1
    }

    pub fn text<'a>(&self, css: &'a str) -> &'a str {
        &css[self.start..self.end()]
    }

    pub fn body<'a>(&self, css: &'a str) -> &'a str {
        &css[self.open + 1..self.close]
    }
}

enum Frame {
    Group,
    Rule {
        start: usize,
        open: usize,
        selector: String,
    },
    Stray,
}

/// Parse all rule blocks, in source order of their closing brace.
pub fn parse_blocks(css: &str) -> Vec<CssBlock> {
    let bytes = css.as_bytes();
    let mut blocks = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut segment_start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = comment_end(css, i);
                if css[segment_start..i].trim().is_empty() {
                    segment_start = end;
                }
                i = end;
                continue;
            }
            b'"' | b'\'' => {
                i = string_end(bytes, i);
                continue;
            }
            b'{' => {
                let prelude = &css[segment_start..i];
                let selector = strip_comments(prelude);
                let selector = selector.trim();
                let frame = if selector.starts_with('@') {
                    Frame::Group
                } else if selector.is_empty() {
                    Frame::Stray
                } else {
                    let lead = prelude.len() - prelude.trim_start().len();
                    Frame::Rule {
                        start: segment_start + lead,
                        open: i,
                        selector: normalize_selector(selector),
                    }
                };
                stack.push(frame);
                segment_start = i + 1;
            }
            b'}' => {
                if let Some(Frame::Rule {
                    start,
                    open,
                    selector,
                }) = stack.pop()
                {
                    let nested = stack.iter().any(|frame| matches!(frame, Frame::Group));
                    blocks.push(CssBlock {
                        selector,
                        start,
                        open,
                        close: i,
                        nested,
                    });
                }
                segment_start = i + 1;
            }
            b';' => segment_start = i + 1,
            _ => {}
        }
        i += 1;
    }

    blocks
}

/// Collapse whitespace and drop spaces around combinators and commas.
pub fn normalize_selector(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = String::with_capacity(collapsed.len());
    for ch in collapsed.chars() {
        if matches!(ch, ',' | '>' | '+' | '~') {
            while out.ends_with(' ') {
                out.pop();
            }
            out.push(ch);
        } else if ch == ' ' && out.ends_with([',', '>', '+', '~']) {
            continue;
        } else {
            out.push(ch);
        }
    }
    out
}

/// The block a patch should target: the last top-level match (cascade order),
/// falling back to the last nested one.
pub fn find_block<'a>(blocks: &'a [CssBlock], selector: &str) -> Option<&'a CssBlock> {
    let wanted = normalize_selector(selector);
    let top_level = blocks
        .iter()
        .filter(|block| block.selector == wanted && !block.nested)
        .max_by_key(|block| block.start);
    top_level.or_else(|| {
        blocks
            .iter()
            .filter(|block| block.selector == wanted)
            .max_by_key(|block| block.start)
    })
}

/// Compiled CSS change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CssPatch {
    Edit(PatchEdit),
    Noop,
}

/// Compile a declaration-level change for `selector` into one literal edit.
///
/// Errors describe why the request is unusable (bad selector, property name
/// or value).
pub fn compile_css_patch(
    css: &str,
    selector: &str,
    set: &BTreeMap<String, String>,
    unset: &[String],
) -> Result<CssPatch, String> {
    let selector = selector.trim();
    if selector.is_empty() || selector.contains(['{', '}', ';']) {
        return Err(format!("invalid selector '{selector}'"));
    }
    if set.is_empty() && unset.is_empty() {
        return Err("css_patch has nothing to set or unset".to_string());
    }
    let mut wanted: BTreeMap<String, String> = BTreeMap::new();
    for (prop, value) in set {
        let prop = validate_property(prop)?;
        let value = value.trim();
        if value.is_empty() || value.contains([';', '{', '}']) {
            return Err(format!("invalid value for '{prop}': '{value}'"));
        }
        wanted.insert(prop, value.to_string());
    }
    let mut removed: BTreeSet<String> = BTreeSet::new();
    for prop in unset {
        removed.insert(validate_property(prop)?);
    }

    let blocks = parse_blocks(css);
    let Some(block) = find_block(&blocks, selector) else {
        return Ok(append_override(css, selector, &wanted));
    };

    let body = block.body(css);
    let new_body = patch_body(body, &wanted, &removed);
    if collapse(&new_body) == collapse(body) {
        return Ok(CssPatch::Noop);
    }

    let anchor_start = unique_anchor_start(css, block.start, block.end());
    let mut replace = String::with_capacity(block.end() - anchor_start + new_body.len());
    replace.push_str(&css[anchor_start..=block.open]);
    replace.push_str(&new_body);
    replace.push('}');
    Ok(CssPatch::Edit(PatchEdit::once(
        &css[anchor_start..block.end()],
        replace,
    )))
}

fn append_override(css: &str, selector: &str, wanted: &BTreeMap<String, String>) -> CssPatch {
    if wanted.is_empty() {
        return CssPatch::Noop;
    }
    let mut block = format!("{selector} {{\n");
    for (prop, value) in wanted {
        block.push_str(&format!("  {prop}: {value};\n"));
    }
    block.push('}');

    if css.trim().is_empty() {
        block.push('\n');
        return CssPatch::Edit(PatchEdit::append(block));
    }

    let content_end = css.trim_end().len();
    let mut tail_start = line_start(css, content_end);
    while css.find(&css[tail_start..content_end]) != Some(tail_start) {
        tail_start = line_start(css, tail_start.saturating_sub(1));
    }
    let anchor = &css[tail_start..content_end];
    CssPatch::Edit(PatchEdit::once(anchor, format!("{anchor}\n\n{block}")))
}

/// Start of the line containing byte `pos`.
fn line_start(css: &str, pos: usize) -> usize {
    css[..pos].rfind('\n').map_or(0, |idx| idx + 1)
}

/// Move `start` backwards until the text `start..end` first occurs at `start`.
fn unique_anchor_start(css: &str, start: usize, end: usize) -> usize {
    let mut s = start;
    loop {
        if css.find(&css[s..end]) == Some(s) {
            return s;
        }
        s = css[..s].char_indices().next_back().map_or(0, |(idx, _)| idx);
    }
}

fn validate_property(raw: &str) -> Result<String, String> {
    let prop = raw.trim().to_ascii_lowercase();
    let valid = !prop.is_empty()
        && prop
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(prop)
    } else {
        Err(format!("invalid property name '{raw}'"))
    }
}

struct Piece<'a> {
    raw: &'a str,
    lead: &'a str,
    decl: &'a str,
    terminated: bool,
}

impl Piece<'_> {
    fn property(&self) -> Option<(String, String)> {
        let cleaned = strip_comments(self.decl);
        let (name, value) = cleaned.split_once(':')?;
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            return None;
        }
        Some((name, collapse(value)))
    }

    /// Property name as written, with surrounding comments kept.
    fn written_name(&self) -> &str {
        self.decl
            .split_once(':')
            .map_or(self.decl, |(name, _)| name.trim_end())
    }
}

fn split_declarations(body: &str) -> (Vec<Piece<'_>>, &str) {
    let bytes = body.as_bytes();
    let mut pieces = Vec::new();
    let mut seg = 0usize;
    let mut depth = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = comment_end(body, i);
                continue;
            }
            b'"' | b'\'' => {
                i = string_end(bytes, i);
                continue;
            }
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b';' if depth == 0 => {
                let raw = &body[seg..=i];
                let lead_len = raw.len() - raw.trim_start().len();
                pieces.push(Piece {
                    raw,
                    lead: &raw[..lead_len],
                    decl: raw[lead_len..raw.len() - 1].trim_end(),
                    terminated: true,
                });
                seg = i + 1;
            }
            _ => {}
        }
        i += 1;
    }

    let rest = &body[seg..];
    if rest.trim().is_empty() {
        return (pieces, rest);
    }
    let lead_len = rest.len() - rest.trim_start().len();
    let content_len = rest.trim_end().len();
    pieces.push(Piece {
        raw: &rest[..content_len],
        lead: &rest[..lead_len],
        decl: &rest[lead_len..content_len],
        terminated: false,
    });
    (pieces, &rest[content_len..])
}

fn patch_body(body: &str, set: &BTreeMap<String, String>, unset: &BTreeSet<String>) -> String {
    let (pieces, trailing) = split_declarations(body);
    let multiline = body.contains('\n');
    let indent = pieces
        .iter()
        .find_map(|piece| piece.lead.rfind('\n').map(|idx| &piece.lead[idx + 1..]))
        .unwrap_or("  ");

    let mut out = String::with_capacity(body.len() + 64);
    let mut handled: BTreeSet<&str> = BTreeSet::new();
    let mut open_declaration = false;

    for piece in &pieces {
        let property = piece.property();
        match property {
            Some((name, _)) if unset.contains(&name) => continue,
            Some((name, current)) if set.contains_key(&name) => {
                let (key, value) = set
                    .get_key_value(&name)
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .unwrap_or_default();
                handled.insert(key);
                if current == collapse(value) {
                    out.push_str(piece.raw);
                    open_declaration = !piece.terminated;
                } else {
                    out.push_str(piece.lead);
                    out.push_str(piece.written_name());
                    out.push_str(": ");
                    out.push_str(value);
                    out.push(';');
                    open_declaration = false;
                }
            }
            _ => {
                out.push_str(piece.raw);
                open_declaration = !piece.terminated;
            }
        }
    }

    let additions: Vec<(&String, &String)> = set
        .iter()
        .filter(|(name, _)| !handled.contains(name.as_str()))
        .collect();
    if additions.is_empty() {
        out.push_str(trailing);
        return out;
    }
    if open_declaration {
        out.push(';');
    }
    for (name, value) in additions {
        if multiline {
            out.push('\n');
            out.push_str(indent);
        } else {
            out.push(' ');
        }
        out.push_str(&format!("{name}: {value};"));
    }
    if trailing.is_empty() && !multiline {
        out.push(' ');
    } else {
        out.push_str(trailing);
    }
    out
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find("*/") {
            Some(end) => rest = &rest[start + 2 + end + 2..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Byte offset just past the comment starting at `start`.
fn comment_end(text: &str, start: usize) -> usize {
    text[start + 2..]
        .find("*/")
        .map_or(text.len(), |idx| start + 2 + idx + 2)
}

/// Byte offset just past the string starting at `start`.
fn string_end(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return i,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::patch::apply_strict;

    fn set(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn edit(patch: CssPatch) -> PatchEdit {
        match patch {
            CssPatch::Edit(edit) => edit,
            CssPatch::Noop => panic!("expected an edit"),
        }
    }

    /// Verifies the canonical button scenario: the anchor is the exact original
    /// block, `color` is replaced in place, `background` is removed and every
    /// other block stays byte-identical.
    #[test]
    fn patches_button_block_in_place() {
        let css = ".header { margin: 0; }\n.btn { color: red; background: white; }\n.footer { padding: 1px; }\n";
        let patch = compile_css_patch(
            css,
            ".btn",
            &set(&[("color", "blue")]),
            &["background".to_string()],
        )
        .expect("compile");
        let edit = edit(patch);
        assert_eq!(edit.find, ".btn { color: red; background: white; }");
        assert_eq!(edit.replace, ".btn { color: blue; }");

        let out = apply_strict(css, &[edit]).expect("apply");
        assert_eq!(
            out,
            ".header { margin: 0; }\n.btn { color: blue; }\n.footer { padding: 1px; }\n"
        );
    }

    #[test]
    fn multiline_block_keeps_indentation_and_order() {
        let css = ".card {\n    padding: 4px;\n    color: red;\n}\n";
        let edit = edit(
            compile_css_patch(css, ".card", &set(&[("border", "0"), ("color", "blue")]), &[])
                .expect("compile"),
        );
        let out = apply_strict(css, &[edit]).expect("apply");
        assert_eq!(
            out,
            ".card {\n    padding: 4px;\n    color: blue;\n    border: 0;\n}\n"
        );
    }

    #[test]
    fn already_applied_change_is_noop() {
        let css = ".btn {\n  color: blue;\n}\n";
        let patch =
            compile_css_patch(css, ".btn", &set(&[("color", " blue ")]), &["margin".to_string()])
                .expect("compile");
        assert_eq!(patch, CssPatch::Noop);
    }

    #[test]
    fn last_top_level_block_wins_over_media_and_earlier_rules() {
        let css = ".btn { color: red; }\n@media (max-width: 600px) {\n  .btn { color: green; }\n}\n.btn { margin: 0; }\n";
        let edit = edit(
            compile_css_patch(css, ".btn", &set(&[("color", "blue")]), &[]).expect("compile"),
        );
        assert_eq!(edit.find, ".btn { margin: 0; }");
        assert_eq!(edit.replace, ".btn { margin: 0; color: blue; }");
    }

    #[test]
    fn duplicate_block_text_extends_anchor_backwards() {
        let css = "a { x: 1; }\n.btn { color: red; }\nb { y: 2; }\n.btn { color: red; }\n";
        let edit = edit(
            compile_css_patch(css, ".btn", &set(&[("color", "blue")]), &[]).expect("compile"),
        );
        assert!(edit.find.ends_with(".btn { color: red; }"));
        assert_eq!(css.find(&edit.find), Some(css.rfind(&edit.find).expect("anchor")));

        let out = apply_strict(css, &[edit]).expect("apply");
        assert_eq!(
            out,
            "a { x: 1; }\n.btn { color: red; }\nb { y: 2; }\n.btn { color: blue; }\n"
        );
    }

    #[test]
    fn comments_and_strings_do_not_confuse_block_boundaries() {
        let css = "/* .btn { } */\n.icon::before { content: \"}\"; }\n.btn { color: red; }\n";
        let blocks = parse_blocks(css);
        let selectors: Vec<&str> = blocks.iter().map(|b| b.selector.as_str()).collect();
        assert_eq!(selectors, vec![".icon::before", ".btn"]);
        assert_eq!(blocks[1].text(css), ".btn { color: red; }");
    }

    #[test]
    fn selector_matching_ignores_whitespace() {
        let css = "nav  >  a,\n.link {\n  color: red;\n}\n";
        let blocks = parse_blocks(css);
        assert!(find_block(&blocks, "nav > a, .link").is_some());
    }

    #[test]
    fn missing_selector_appends_override_after_stable_tail() {
        let css = "}\n.a { x: 1; }\n}\n";
        let edit = edit(
            compile_css_patch(css, ".hero", &set(&[("color", "blue")]), &[]).expect("compile"),
        );
        assert_eq!(css.find(&edit.find).map(|i| i + edit.find.len()), Some(css.trim_end().len()));
        let out = apply_strict(css, &[edit]).expect("apply");
        assert_eq!(out, "}\n.a { x: 1; }\n}\n\n.hero {\n  color: blue;\n}\n");
    }

    #[test]
    fn empty_stylesheet_uses_append() {
        let edit = edit(
            compile_css_patch("", ".hero", &set(&[("color", "blue")]), &[]).expect("compile"),
        );
        assert_eq!(edit.mode, crate::action::EditMode::Append);
        assert_eq!(edit.replace, ".hero {\n  color: blue;\n}\n");
    }

    #[test]
    fn values_with_structural_characters_are_rejected() {
        let err = compile_css_patch(".a{}", ".a", &set(&[("color", "red; }")]), &[])
            .expect_err("invalid");
        assert!(err.contains("invalid value"));
    }

    #[test]
    fn string_values_with_semicolons_stay_intact() {
        let css = ".q { content: \"a;b\"; color: red; }";
        let edit = edit(
            compile_css_patch(css, ".q", &set(&[("color", "blue")]), &[]).expect("compile"),
        );
        assert_eq!(edit.replace, ".q { content: \"a;b\"; color: blue; }");
    }
}

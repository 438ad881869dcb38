//! Fixed-width status line formatting.
//!
//! Item names are shortened by cutting out their middle so both ends stay
//! recognisable. [`fit`] lays out one or two message segments on a single
//! line and decides how much each item name has to give up.

use std::str::FromStr;

use thiserror::Error;

/// Default terminal width for status lines.
pub const DEFAULT_WIDTH: usize = 80;

const ELLIPSIS: &str = "...";

/// Shortest length [`truncate`] will ever produce for a shortened string:
/// two characters from each end around the ellipsis.
const MIN_TRUNCATED_LEN: usize = 7;

/// Minimum number of spaces between two segments.
const SEGMENT_GAP: usize = 2;

/// Errors from parsing a message template.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template {template:?} has more than one %s placeholder")]
    MultipleSlots { template: String },

    #[error("template {template:?} ends with a lone '%'")]
    DanglingPercent { template: String },

    #[error("template {template:?} uses unsupported directive '%{directive}'")]
    UnknownDirective { template: String, directive: char },
}

/// Shorten `text` to at most `max_len` characters by replacing its middle
/// with `...`.
///
/// `max_len` is clamped to 7 so a shortened name always keeps at least two
/// characters from each end. Text that already fits is returned unchanged.
pub fn truncate(text: &str, max_len: usize) -> String {
    let max_len = max_len.max(MIN_TRUNCATED_LEN);
    let len = char_len(text);
    if len <= max_len {
        return text.to_string();
    }

    let keep = max_len - ELLIPSIS.len();
    let left = keep.div_ceil(2);
    let right = keep / 2;

    let mut out = String::with_capacity(text.len());
    out.extend(text.chars().take(left));
    out.push_str(ELLIPSIS);
    out.extend(text.chars().skip(len - right));
    out
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// A message with at most one slot for an item name.
///
/// The textual form uses `%s` for the slot and `%%` for a literal percent
/// sign. Templates built with [`Template::with_slot`] or
/// [`Template::literal`] need no escaping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    head: String,
    /// Text after the slot; `None` for a literal template.
    tail: Option<String>,
}

impl Template {
    /// A template with no slot. Rendering ignores the item name.
    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            head: text.into(),
            tail: None,
        }
    }

    /// A template rendering as `prefix`, the item name, then `suffix`.
    pub fn with_slot(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            head: prefix.into(),
            tail: Some(suffix.into()),
        }
    }

    pub fn has_slot(&self) -> bool {
        self.tail.is_some()
    }

    pub fn render(&self, item: &str) -> String {
        match &self.tail {
            Some(tail) => format!("{}{}{}", self.head, item, tail),
            None => self.head.clone(),
        }
    }

    fn rendered_len(&self, item: &str) -> usize {
        match &self.tail {
            Some(tail) => char_len(&self.head) + char_len(item) + char_len(tail),
            None => char_len(&self.head),
        }
    }
}

impl FromStr for Template {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fn push(head: &mut String, tail: &mut Option<String>, c: char) {
            tail.as_mut().unwrap_or(head).push(c);
        }

        let mut head = String::new();
        let mut tail: Option<String> = None;
        let mut chars = s.chars();

        while let Some(c) = chars.next() {
            if c != '%' {
                push(&mut head, &mut tail, c);
                continue;
            }
            match chars.next() {
                Some('%') => push(&mut head, &mut tail, '%'),
                Some('s') if tail.is_some() => {
                    return Err(TemplateError::MultipleSlots {
                        template: s.to_string(),
                    });
                }
                Some('s') => tail = Some(String::new()),
                Some(directive) => {
                    return Err(TemplateError::UnknownDirective {
                        template: s.to_string(),
                        directive,
                    });
                }
                None => {
                    return Err(TemplateError::DanglingPercent {
                        template: s.to_string(),
                    });
                }
            }
        }

        Ok(Self { head, tail })
    }
}

/// A template paired with the item name that fills its slot.
#[derive(Debug, Clone, Copy)]
pub struct Segment<'a> {
    template: &'a Template,
    item: &'a str,
}

impl<'a> Segment<'a> {
    pub fn new(template: &'a Template, item: &'a str) -> Self {
        Self { template, item }
    }

    fn len(&self) -> usize {
        self.template.rendered_len(self.item)
    }

    /// Render with the item name shortened by `shrink` characters.
    fn render_shrunk(&self, shrink: usize) -> String {
        if shrink == 0 {
            return self.template.render(self.item);
        }
        let item = truncate(self.item, char_len(self.item).saturating_sub(shrink));
        self.template.render(&item)
    }
}

/// Lay out `primary` and an optional `secondary` segment on one line of
/// `width` columns, separated by at least two spaces.
///
/// Only item names are ever shortened. Because [`truncate`] never goes
/// below seven characters, the result can still exceed `width` for very
/// narrow widths.
pub fn fit(primary: Segment<'_>, secondary: Option<Segment<'_>>, width: usize) -> String {
    let len_primary = primary.len();

    let Some(secondary) = secondary else {
        return primary.render_shrunk(len_primary.saturating_sub(width));
    };

    let budget = width.saturating_sub(SEGMENT_GAP);
    let (left, right) = if secondary.template.has_slot() {
        let (shrink_primary, shrink_secondary) = balance(len_primary, secondary.len(), budget);
        (
            primary.render_shrunk(shrink_primary),
            secondary.render_shrunk(shrink_secondary),
        )
    } else {
        let needed = (len_primary + secondary.len()).saturating_sub(budget);
        (primary.render_shrunk(needed), secondary.render_shrunk(0))
    };

    let pad = width
        .saturating_sub(char_len(&left) + char_len(&right))
        .max(SEGMENT_GAP);
    format!("{}{}{}", left, " ".repeat(pad), right)
}

/// Decide how many characters each of two segments gives up so their
/// combined length fits `budget`.
///
/// The longer segment shrinks first. Once both are the same length the
/// remaining reduction is split, with the odd character taken from the
/// second segment.
fn balance(len_a: usize, len_b: usize, budget: usize) -> (usize, usize) {
    let (mut a, mut b) = (len_a, len_b);
    while a + b > budget {
        let needed = a + b - budget;
        if a > b {
            if a - b >= needed {
                a -= needed;
            } else {
                a = b;
            }
        } else if b > a {
            if b - a >= needed {
                b -= needed;
            } else {
                b = a;
            }
        } else {
            a -= needed / 2;
            b -= needed.div_ceil(2);
        }
    }
    (len_a - a, len_b - b)
}

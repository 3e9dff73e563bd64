use serde::{Deserialize, Serialize};

use super::{Paragraph, Token};
use crate::languages::ocr_joins_without_space;

/// Fixed pixel gaps used to decide whether a token continues a paragraph.
///
/// These are absolute distances tuned against one capture size; they do not
/// follow DPI or zoom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingThresholds {
    pub vertical: i32,
    pub horizontal: i32,
}

impl Default for GroupingThresholds {
    fn default() -> Self {
        Self {
            vertical: 50,
            horizontal: 100,
        }
    }
}

impl GroupingThresholds {
    /// Vertical continuation: the token starts less than `vertical` px below the
    /// paragraph. Horizontal continuation: it starts to the right of the
    /// paragraph, less than `horizontal` px past its edge.
    pub fn continues(&self, paragraph: &Paragraph, token: &Token) -> bool {
        let below = token.bbox.y - paragraph.bbox.bottom();
        let beside = token.bbox.x - paragraph.bbox.right();
        below < self.vertical || (0..self.horizontal).contains(&beside)
    }
}

/// Drops tokens with blank text or a degenerate box.
pub fn retain_tokens(tokens: Vec<Token>) -> Vec<Token> {
    tokens
        .into_iter()
        .filter_map(|token| {
            let text = token.text.trim();
            if text.is_empty() || token.bbox.width <= 1 || token.bbox.height <= 1 {
                return None;
            }
            Some(Token {
                text: text.to_string(),
                bbox: token.bbox,
            })
        })
        .collect()
}

/// Groups tokens, in reading order, into paragraphs in one forward pass.
///
/// The open paragraph's box only ever grows, so a wide or tall token can pull
/// in unrelated later tokens.
pub fn reconstruct(tokens: &[Token], thresholds: &GroupingThresholds) -> Vec<Paragraph> {
    let mut paragraphs = Vec::new();
    let mut current: Option<Paragraph> = None;

    for token in tokens {
        current = Some(match current.take() {
            None => Paragraph::from_token(token),
            Some(mut paragraph) if thresholds.continues(&paragraph, token) => {
                paragraph.bbox = paragraph.bbox.union(&token.bbox);
                paragraph.text.push(' ');
                paragraph.text.push_str(&token.text);
                paragraph
            }
            Some(paragraph) => {
                paragraphs.push(paragraph);
                Paragraph::from_token(token)
            }
        });
    }
    if let Some(paragraph) = current {
        paragraphs.push(paragraph);
    }
    paragraphs
}

/// Joins paragraph texts; scripts without word spacing are joined directly.
pub fn full_text(paragraphs: &[Paragraph], ocr_code: &str) -> String {
    let separator = if ocr_joins_without_space(ocr_code) {
        ""
    } else {
        " "
    };
    paragraphs
        .iter()
        .map(|paragraph| paragraph.text.as_str())
        .collect::<Vec<_>>()
        .join(separator)
}

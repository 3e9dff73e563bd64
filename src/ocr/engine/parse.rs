use crate::geometry::BBox;
use crate::ocr::Token;

const WORD_LEVEL: i32 = 5;

/// Word rows of tesseract TSV output, in the order tesseract emitted them.
///
/// Rows that are not word level or do not parse are skipped. Blank text is
/// kept; filtering happens later with the degenerate boxes.
pub(super) fn parse_tsv_tokens(tsv: &str) -> Vec<Token> {
    tsv.lines()
        .skip(1)
        .filter_map(|row| {
            let cols = row.split('\t').collect::<Vec<_>>();
            if cols.len() < 12 {
                return None;
            }
            let level: i32 = cols[0].trim().parse().ok()?;
            if level != WORD_LEVEL {
                return None;
            }
            let left: i32 = cols[6].trim().parse().ok()?;
            let top: i32 = cols[7].trim().parse().ok()?;
            let width: i32 = cols[8].trim().parse().ok()?;
            let height: i32 = cols[9].trim().parse().ok()?;
            Some(Token {
                text: cols[11].to_string(),
                bbox: BBox::new(left, top, width, height),
            })
        })
        .collect()
}

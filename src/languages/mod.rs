use anyhow::{Result, anyhow};
use serde::Serialize;

/// A language the overlay can read from or translate into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Language {
    pub name: &'static str,
    /// Tesseract traineddata code.
    pub ocr: &'static str,
    /// Google Translate code.
    pub google: &'static str,
    /// DeepL target code, when DeepL offers one.
    pub deepl: Option<&'static str>,
}

impl Language {
    /// Scripts written without spaces between words.
    pub fn joins_without_space(&self) -> bool {
        ocr_joins_without_space(self.ocr)
    }
}

pub fn ocr_joins_without_space(ocr_code: &str) -> bool {
    matches!(ocr_code, "chi_sim" | "chi_tra")
}

const fn lang(
    name: &'static str,
    ocr: &'static str,
    google: &'static str,
    deepl: Option<&'static str>,
) -> Language {
    Language {
        name,
        ocr,
        google,
        deepl,
    }
}

pub const LANGUAGES: &[Language] = &[
    lang("English", "eng", "en", Some("EN")),
    lang("Spanish", "spa", "es", Some("ES")),
    lang("French", "fra", "fr", Some("FR")),
    lang("German", "deu", "de", Some("DE")),
    lang("Chinese (Simplified)", "chi_sim", "zh-cn", Some("ZH")),
    lang("Chinese (Traditional)", "chi_tra", "zh-tw", None),
    lang("Japanese", "jpn", "ja", Some("JA")),
    lang("Korean", "kor", "ko", Some("KO")),
    lang("Russian", "rus", "ru", Some("RU")),
    lang("Italian", "ita", "it", Some("IT")),
    lang("Portuguese", "por", "pt", Some("PT")),
    lang("Dutch", "nld", "nl", Some("NL")),
    lang("Greek", "ell", "el", Some("EL")),
    lang("Arabic", "ara", "ar", Some("AR")),
    lang("Hindi", "hin", "hi", None),
    lang("Bengali", "ben", "bn", None),
    lang("Turkish", "tur", "tr", Some("TR")),
    lang("Vietnamese", "vie", "vi", None),
    lang("Polish", "pol", "pl", Some("PL")),
    lang("Ukrainian", "ukr", "uk", Some("UK")),
    lang("Hebrew", "heb", "he", None),
    lang("Swedish", "swe", "sv", Some("SV")),
    lang("Norwegian", "nor", "no", Some("NB")),
    lang("Finnish", "fin", "fi", Some("FI")),
    lang("Danish", "dan", "da", Some("DA")),
    lang("Hungarian", "hun", "hu", Some("HU")),
    lang("Czech", "ces", "cs", Some("CS")),
    lang("Romanian", "ron", "ro", Some("RO")),
    lang("Thai", "tha", "th", None),
    lang("Indonesian", "ind", "id", Some("ID")),
    lang("Malay", "msa", "ms", None),
    lang("Filipino", "fil", "tl", None),
    lang("Swahili", "swa", "sw", None),
];

pub fn english() -> &'static Language {
    &LANGUAGES[0]
}

/// Looks a language up by display name or by any of its codes.
pub fn find(query: &str) -> Option<&'static Language> {
    let query = query.trim();
    if query.is_empty() {
        return None;
    }
    LANGUAGES.iter().find(|language| {
        language.name.eq_ignore_ascii_case(query)
            || language.ocr.eq_ignore_ascii_case(query)
            || language.google.eq_ignore_ascii_case(query)
    })
}

pub fn resolve(query: &str) -> Result<&'static Language> {
    find(query).ok_or_else(|| anyhow!("unknown language '{}'", query.trim()))
}

pub fn from_ocr_code(code: &str) -> Option<&'static Language> {
    LANGUAGES.iter().find(|language| language.ocr == code)
}

/// OCR code for a display name, falling back to English like the capture UI.
pub fn ocr_code_for(name: &str) -> &'static str {
    find(name).map(|language| language.ocr).unwrap_or("eng")
}

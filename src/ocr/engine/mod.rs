mod parse;
mod tesseract;
mod vision;

pub use tesseract::{Tesseract, list_tesseract_languages};
pub use vision::GoogleVision;

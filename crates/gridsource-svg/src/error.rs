//! Error definitions for SVG replay

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SvgError {
    #[error("XML error: {0}")]
    Xml(String),

    #[error("Document has no <svg> root element")]
    MissingRoot,

    #[error("Invalid canvas size {width}x{height}")]
    InvalidSize { width: f64, height: f64 },
}

pub type Result<T> = std::result::Result<T, SvgError>;

impl From<roxmltree::Error> for SvgError {
    fn from(err: roxmltree::Error) -> Self {
        SvgError::Xml(err.to_string())
    }
}

/// Result type for XML parsing operations
pub type XmlParseResult<T> = Result<T, XmlParseError>;

/// Error type for XML decoding failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum XmlParseError {
    #[error("XML syntax error: {0}")]
    SyntaxError(String),

    #[error("Missing required element: {element}")]
    MissingElement { element: String },

    #[error("Invalid XML structure: {0}")]
    InvalidStructure(String),
}

/// Convert from quick_xml::Error to XmlParseError
impl From<quick_xml::Error> for XmlParseError {
    fn from(error: quick_xml::Error) -> Self {
        XmlParseError::SyntaxError(error.to_string())
    }
}

/// Convert from quick_xml::events::attributes::AttrError to XmlParseError
impl From<quick_xml::events::attributes::AttrError> for XmlParseError {
    fn from(error: quick_xml::events::attributes::AttrError) -> Self {
        XmlParseError::SyntaxError(error.to_string())
    }
}

use percent_encoding::percent_decode_str;

/// Decode a payload that arrives both URL-encoded and XML-escaped.
///
/// The input is percent-decoded first, then exactly five XML entities are
/// reversed in a fixed order. `&amp;` comes last so that `&amp;lt;` turns
/// into `&lt;` and stops there. Any other entity is left untouched; this is
/// not a general entity decoder.
pub fn decode_payload(encoded: &str) -> String {
    let decoded = percent_decode_str(encoded).decode_utf8_lossy();
    decode_entities(&decoded)
}

/// Reverse the fixed entity set without touching percent escapes
pub fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&amp;", "&")
}

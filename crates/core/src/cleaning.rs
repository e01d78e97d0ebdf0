/// Characters that extraction backends are known to leak into page text:
/// nulls and replacement characters from broken encodings, terminal escapes
/// from tesseract, and a handful of OCR-garbage glyphs.
const STRIPPED: [char; 7] = [
    '\u{0000}',
    '\u{fffd}',
    '\u{001b}',
    '\r',
    '\u{f8ff}',
    '\u{2020}',
    '\u{2021}',
];

pub fn clean_text(text: &str) -> String {
    let mut cleaned: String = text
        .chars()
        .filter(|character| !STRIPPED.contains(character))
        .map(|character| if character == '\u{000c}' { '\n' } else { character })
        .collect();

    // Collapse runs of spaces until a fixed point so cleaning stays idempotent.
    while cleaned.contains("  ") {
        cleaned = cleaned.replace("  ", " ");
    }

    cleaned.trim().to_string()
}

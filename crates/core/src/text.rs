//! Text folding shared by the resolvers and matchers.
//!
//! Inbound WhatsApp text mixes English, Arabic, Arabic-Indic digits and
//! diacritics. Everything that compares user text against keyword tables
//! goes through [`normalize`] first so that `الأحد`, `الاحد` and `الأَحد`
//! compare equal.

/// Lowercases, folds Arabic letter variants, drops diacritics and tatweel,
/// and maps Arabic-Indic and Extended Arabic-Indic digits to ASCII.
pub fn normalize(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\u{0660}'..='\u{0669}' => {
                output.push(char::from(b'0' + (ch as u32 - 0x0660) as u8));
            }
            '\u{06F0}'..='\u{06F9}' => {
                output.push(char::from(b'0' + (ch as u32 - 0x06F0) as u8));
            }
            '\u{064B}'..='\u{0652}' | '\u{0640}' => {}
            'أ' | 'إ' | 'آ' | 'ٱ' => output.push('ا'),
            'ى' => output.push('ي'),
            'ة' => output.push('ه'),
            '،' => output.push(','),
            '؟' => output.push('?'),
            other => output.extend(other.to_lowercase()),
        }
    }
    output
}

/// Normalized text reduced to space separated words, padded with a leading
/// and trailing space so phrase lookups can use plain `contains`.
pub fn word_padded(text: &str) -> String {
    let normalized = normalize(text);
    let words: Vec<&str> = normalized
        .split(|ch: char| !(ch.is_alphanumeric() || ch == '-'))
        .filter(|word| !word.is_empty())
        .collect();
    format!(" {} ", words.join(" "))
}

/// True when `phrase` occurs in `padded` as a whole word sequence.
pub fn contains_phrase(padded: &str, phrase: &str) -> bool {
    let needle = word_padded(phrase);
    if needle.trim().is_empty() {
        return false;
    }
    padded.contains(&needle)
}

/// True when any character falls in the Arabic block.
pub fn contains_arabic(text: &str) -> bool {
    text.chars().any(|ch| ('\u{0600}'..='\u{06FF}').contains(&ch))
}

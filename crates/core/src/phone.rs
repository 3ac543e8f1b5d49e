/// Reduces a WhatsApp sender id to the local phone format the patient
/// directory indexes on.
///
/// `970591234567@c.us`, `+972 59 123 4567` and `0591234567` all normalize to
/// `0591234567`. Numbers that do not look like Palestinian or Israeli mobile
/// numbers are returned as bare digits.
pub fn normalize_phone(sender_id: &str) -> String {
    let without_suffix = sender_id.split('@').next().unwrap_or(sender_id);
    let digits: String = without_suffix.chars().filter(char::is_ascii_digit).collect();

    for country_code in ["970", "972"] {
        if let Some(rest) = digits.strip_prefix(country_code) {
            if rest.len() == 9 {
                return format!("0{rest}");
            }
        }
    }

    if digits.len() == 9 && digits.starts_with('5') {
        return format!("0{digits}");
    }

    digits
}

#[cfg(test)]
mod tests {
    use super::normalize_phone;

    #[test]
    fn international_and_chat_ids_reduce_to_local_format() {
        assert_eq!(normalize_phone("970591234567@c.us"), "0591234567");
        assert_eq!(normalize_phone("+972 59-123-4567"), "0591234567");
        assert_eq!(normalize_phone("591234567"), "0591234567");
        assert_eq!(normalize_phone("0591234567"), "0591234567");
    }

    #[test]
    fn foreign_numbers_keep_their_digits() {
        assert_eq!(normalize_phone("971500000001"), "971500000001");
        assert_eq!(normalize_phone("+1 (555) 010-0000"), "15550100000");
    }
}

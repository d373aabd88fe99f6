//! Recipient address normalization.

/// Suffix of one-to-one recipient addresses.
pub const DIRECT_DOMAIN: &str = "@s.whatsapp.net";
/// Suffix of group recipient addresses.
pub const GROUP_DOMAIN: &str = "@g.us";
/// Prepended to bare 9-digit local numbers.
pub const DEFAULT_COUNTRY_CODE: &str = "51";

/// Turn whatever the caller typed into a network address.
///
/// Group and fully qualified direct addresses pass through (groups are
/// trimmed). Anything else is reduced to its digits, a 9-digit local number
/// gets the default country code, and the direct domain is appended.
/// This never fails: garbage in gives an address the network will reject.
pub fn normalize_recipient(input: &str) -> String {
    if input.contains(GROUP_DOMAIN) {
        return input.trim().to_string();
    }
    if input.contains(DIRECT_DOMAIN) {
        return input.to_string();
    }

    let digits: String = input.chars().filter(char::is_ascii_digit).collect();
    if digits.len() == 9 {
        format!("{DEFAULT_COUNTRY_CODE}{digits}{DIRECT_DOMAIN}")
    } else {
        format!("{digits}{DIRECT_DOMAIN}")
    }
}

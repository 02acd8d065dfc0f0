pub const ALIAS_PREFIX: &str = "alias/";

/// Canonical alias identifier: prefixed with `alias/` unless it already is.
pub fn ensure_alias_name(name: &str) -> String {
    if name.starts_with(ALIAS_PREFIX) {
        name.to_string()
    } else {
        format!("{ALIAS_PREFIX}{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_short_names_once() {
        assert_eq!(ensure_alias_name("payments"), "alias/payments");
        assert_eq!(ensure_alias_name("alias/payments"), "alias/payments");
        assert_eq!(ensure_alias_name("alias/"), "alias/");
        assert_eq!(ensure_alias_name(""), "alias/");
    }
}

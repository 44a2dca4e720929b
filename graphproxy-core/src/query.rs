//! Query-string decoding and canonical re-encoding.
//!
//! Cache fingerprints must not depend on the order in which a client
//! happened to serialize its query, so re-encoding sorts pairs by
//! (key, value) before escaping.

use url::form_urlencoded;

/// Decoded multi-valued query pairs, in arrival order.
pub type QueryPairs = Vec<(String, String)>;

/// Decode a raw query string into pairs.
pub fn parse_query(raw: &str) -> QueryPairs {
    form_urlencoded::parse(raw.as_bytes())
        .into_owned()
        .collect()
}

/// Re-encode pairs canonically: sorted by (key, value), form-urlencoded.
pub fn encode_canonical(pairs: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = pairs.iter().collect();
    sorted.sort();
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in sorted {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

/// Remove every pair named `name`, returning the first removed value.
pub fn remove_param(pairs: &mut QueryPairs, name: &str) -> Option<String> {
    let mut first = None;
    pairs.retain(|(key, value)| {
        if key == name {
            if first.is_none() {
                first = Some(value.clone());
            }
            false
        } else {
            true
        }
    });
    first
}

/// First value for `name`, if present.
pub fn first_value<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_decodes_escapes() {
        let pairs = parse_query("a=1&b=two%20words&a=3");
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "two words".to_string()),
                ("a".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn canonical_encoding_is_order_independent() {
        let forward = parse_query("a=1&b=2");
        let backward = parse_query("b=2&a=1");
        assert_eq!(encode_canonical(&forward), encode_canonical(&backward));
        assert_eq!(encode_canonical(&forward), "a=1&b=2");
    }

    #[test]
    fn canonical_encoding_escapes() {
        let pairs = vec![("q".to_string(), "two words".to_string())];
        assert_eq!(encode_canonical(&pairs), "q=two+words");
    }

    #[test]
    fn empty_query_round_trips() {
        assert!(parse_query("").is_empty());
        assert_eq!(encode_canonical(&[]), "");
    }

    #[test]
    fn remove_param_takes_all_occurrences() {
        let mut pairs = parse_query("fields=name&x=1&fields=about");
        let removed = remove_param(&mut pairs, "fields");
        assert_eq!(removed.as_deref(), Some("name"));
        assert_eq!(pairs, vec![("x".to_string(), "1".to_string())]);
        assert_eq!(remove_param(&mut pairs, "fields"), None);
    }

    #[test]
    fn first_value_finds_first() {
        let pairs = parse_query("a=1&a=2");
        assert_eq!(first_value(&pairs, "a"), Some("1"));
        assert_eq!(first_value(&pairs, "b"), None);
    }
}

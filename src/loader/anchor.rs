//! Selector anchoring.
//!
//! Selector patterns always match the whole candidate string: a pattern is
//! rewritten to start with `^` and end with `$` exactly once.

/// Anchor a selector pattern. Idempotent.
pub fn anchor(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 2);
    if !pattern.starts_with('^') {
        out.push('^');
    }
    out.push_str(pattern);
    if !pattern.ends_with('$') {
        out.push('$');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchors_bare_patterns() {
        assert_eq!(anchor("file:.*"), "^file:.*$");
    }

    #[test]
    fn preserves_existing_anchors() {
        assert_eq!(anchor("^file:.*$"), "^file:.*$");
        assert_eq!(anchor("^file:.*"), "^file:.*$");
        assert_eq!(anchor("file:.*$"), "^file:.*$");
    }

    #[test]
    fn idempotent_for_arbitrary_inputs() {
        for raw in ["", "a", "^", "$", ".*", "^^a$$"] {
            let once = anchor(raw);
            assert_eq!(anchor(&once), once, "double anchoring changed {raw:?}");
        }
    }
}

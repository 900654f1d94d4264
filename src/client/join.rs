//! Whitespace-insertion heuristic for gluing streamed text fragments.
//!
//! Chunk boundaries carry no token-boundary information, so this is a
//! best-effort repair, not a grammar-aware joiner. Rules are evaluated in
//! order and the first match wins; only rule (g) inserts anything.

/// Longest leading letter run of a fragment still treated as a sub-word piece.
pub const MAX_CONTINUATION_LEN: usize = 3;

const CLOSING_PUNCT: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}'];
const OPENING_BRACKETS: &[char] = &['(', '[', '{'];
const QUOTES: &[char] = &['\'', '"', '`', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}'];
const APOSTROPHES: &[char] = &['\'', '\u{2019}'];

/// Append `fragment` to `existing`, inserting at most one space.
pub fn join(existing: &str, fragment: &str) -> String {
    let mut out = String::with_capacity(existing.len() + fragment.len() + 1);
    out.push_str(existing);
    join_into(&mut out, fragment);
    out
}

/// In-place variant used by the stream reconstructor.
pub fn join_into(existing: &mut String, fragment: &str) {
    if needs_space(existing, fragment) {
        existing.push(' ');
    }
    existing.push_str(fragment);
}

fn needs_space(existing: &str, fragment: &str) -> bool {
    let (Some(last), Some(first)) = (existing.chars().next_back(), fragment.chars().next()) else {
        return false;
    };

    // a. whitespace already present on either side
    if last.is_whitespace() || first.is_whitespace() {
        return false;
    }
    // b. mid-word continuation
    if last.is_alphabetic() && first.is_lowercase() && is_subword(existing, fragment) {
        return false;
    }
    // c. contraction
    if QUOTES.contains(&last) && first.is_alphabetic() {
        return false;
    }
    if last.is_alphabetic() && APOSTROPHES.contains(&first) {
        return false;
    }
    // d. numeric grouping
    if last == ',' && first.is_ascii_digit() {
        return false;
    }
    // e. closing punctuation
    if CLOSING_PUNCT.contains(&first) {
        return false;
    }
    // f. opening bracket
    if OPENING_BRACKETS.contains(&last) {
        return false;
    }
    // g.
    true
}

/// A lowercase fragment continues the previous word only when it looks like a
/// tokenizer piece: short itself, following a word stem of at least two letters.
fn is_subword(existing: &str, fragment: &str) -> bool {
    let stem = existing
        .chars()
        .rev()
        .take_while(|c| c.is_alphabetic())
        .count();
    let piece = fragment.chars().take_while(|c| c.is_alphabetic()).count();
    stem >= 2 && piece <= MAX_CONTINUATION_LEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_cases() {
        assert_eq!(join("Ch", "imo"), "Chimo");
        assert_eq!(join("don", "'t"), "don't");
        assert_eq!(join("1,", "600"), "1,600");
        assert_eq!(join("end of sentence", "!"), "end of sentence!");
        assert_eq!(join("hello", "world"), "hello world");
    }

    #[test]
    fn whitespace_on_either_side_is_kept_as_is() {
        assert_eq!(join("The ", "quick"), "The quick");
        assert_eq!(join("quick", " brown"), "quick brown");
        assert_eq!(join("line\n", "Next"), "line\nNext");
    }

    #[test]
    fn quotes_and_brackets() {
        assert_eq!(join("it\u{2019}", "s"), "it\u{2019}s");
        assert_eq!(join("said \"", "Hello"), "said \"Hello");
        assert_eq!(join("see (", "Figure"), "see (Figure");
        assert_eq!(join("Figure 2", ")"), "Figure 2)");
        assert_eq!(join("wait", ";"), "wait;");
    }

    #[test]
    fn capitalised_or_long_fragments_start_a_new_word() {
        assert_eq!(join("Paris", "France"), "Paris France");
        assert_eq!(join("a", "cat"), "a cat");
        assert_eq!(join("1,", "and"), "1, and");
        assert_eq!(join("42", "people"), "42 people");
    }

    #[test]
    fn empty_sides_concatenate() {
        assert_eq!(join("", "Hello"), "Hello");
        assert_eq!(join("Hello", ""), "Hello");
    }
}

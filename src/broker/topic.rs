//! Topic exchange pattern matching.
//!
//! Routing keys and binding patterns are dot-separated words. In a pattern
//! `*` stands for exactly one word and `#` for zero or more words.

/// Wildcard matching any routing key.
pub const MATCH_ALL: &str = "#";

/// Check whether `routing_key` matches the binding `pattern`.
pub fn matches(pattern: &str, routing_key: &str) -> bool {
    let pattern = words(pattern);
    let key = words(routing_key);
    match_words(&pattern, &key)
}

fn words(s: &str) -> Vec<&str> {
    if s.is_empty() {
        Vec::new()
    } else {
        s.split('.').collect()
    }
}

/// Walks the pattern once, keeping the set of key positions reachable after
/// each pattern word. Runs in `O(pattern * key)` however many `#` it holds.
fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    let mut reachable = vec![false; key.len() + 1];
    reachable[0] = true;

    for &word in pattern {
        let mut next = vec![false; key.len() + 1];
        match word {
            "#" => {
                let mut seen = false;
                for (pos, &here) in reachable.iter().enumerate() {
                    seen |= here;
                    next[pos] = seen;
                }
            }
            _ => {
                for (pos, part) in key.iter().enumerate() {
                    next[pos + 1] = reachable[pos] && (word == "*" || word == *part);
                }
            }
        }
        if !next.contains(&true) {
            return false;
        }
        reachable = next;
    }

    reachable[key.len()]
}

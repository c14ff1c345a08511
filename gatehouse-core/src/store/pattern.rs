//! Redis-compatible glob matching
//!
//! Pattern deletes run against Dragonfly with `SCAN MATCH`, and against the local
//! fallback with [`glob_match`]. Both sides must agree on which keys a pattern
//! selects, so this follows the Redis `stringmatchlen` rules: `*`, `?`, `[...]`
//! classes with ranges and `^` negation, and `\` escapes.

/// Characters with a special meaning inside a glob pattern
const GLOB_SPECIAL: &[char] = &['*', '?', '[', ']', '\\'];

/// Returns true when `key` matches the glob `pattern`
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();
    match_from(&pattern, &key)
}

fn match_from(pattern: &[char], key: &[char]) -> bool {
    let (mut p, mut k) = (0usize, 0usize);
    // Backtrack point for the most recent `*`
    let mut star: Option<(usize, usize)> = None;

    while k < key.len() {
        if p < pattern.len() {
            match pattern[p] {
                '*' => {
                    while p < pattern.len() && pattern[p] == '*' {
                        p += 1;
                    }
                    if p == pattern.len() {
                        return true;
                    }
                    star = Some((p, k));
                    continue;
                }
                '?' => {
                    p += 1;
                    k += 1;
                    continue;
                }
                '[' => {
                    if let Some((matched, next)) = match_class(pattern, p, key[k])
                        && matched
                    {
                        p = next;
                        k += 1;
                        continue;
                    }
                }
                '\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == key[k] {
                        p += 2;
                        k += 1;
                        continue;
                    }
                }
                c => {
                    if c == key[k] {
                        p += 1;
                        k += 1;
                        continue;
                    }
                }
            }
        }

        match star {
            Some((star_p, star_k)) => {
                p = star_p;
                k = star_k + 1;
                star = Some((star_p, star_k + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

/// Match a `[...]` class starting at `start`; returns (matched, index after the class)
fn match_class(pattern: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = pattern.get(i) == Some(&'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    loop {
        match pattern.get(i) {
            None => return None,
            Some(']') => break,
            Some('\\') => {
                if pattern.get(i + 1) == Some(&c) {
                    matched = true;
                }
                i += 2;
            }
            Some(&lo) => {
                if pattern.get(i + 1) == Some(&'-')
                    && let Some(&hi) = pattern.get(i + 2)
                    && hi != ']'
                {
                    let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
                    if lo <= c && c <= hi {
                        matched = true;
                    }
                    i += 3;
                } else {
                    if lo == c {
                        matched = true;
                    }
                    i += 1;
                }
            }
        }
    }

    Some((matched != negate, i + 1))
}

/// Escape a literal so it matches only itself inside a glob pattern
pub fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if GLOB_SPECIAL.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Glob matching for KEYS patterns.
/// Supports: * (any sequence), ? (any single byte), [abc], [^abc], [a-z], \ (escape)
pub fn glob_match(pattern: &str, key: &str) -> bool {
    matches(pattern.as_bytes(), key.as_bytes())
}

fn matches(pattern: &[u8], key: &[u8]) -> bool {
    let (mut pi, mut ki) = (0, 0);
    // Position to resume from after the most recent '*': (pattern, key).
    let mut backtrack: Option<(usize, usize)> = None;

    while ki < key.len() {
        let step = match pattern.get(pi) {
            Some(b'*') => {
                backtrack = Some((pi + 1, ki));
                pi += 1;
                continue;
            }
            Some(b'?') => Some(1),
            Some(b'[') => class_match(&pattern[pi..], key[ki]),
            Some(b'\\') if pi + 1 < pattern.len() => (pattern[pi + 1] == key[ki]).then_some(2),
            Some(&c) => (c == key[ki]).then_some(1),
            None => None,
        };

        match step {
            Some(width) => {
                pi += width;
                ki += 1;
            }
            None => match backtrack {
                Some((star_pi, star_ki)) => {
                    backtrack = Some((star_pi, star_ki + 1));
                    pi = star_pi;
                    ki = star_ki + 1;
                }
                None => return false,
            },
        }
    }

    pattern[pi..].iter().all(|&c| c == b'*')
}

/// Match one byte against a bracket class at the start of `pattern`.
/// Returns the width of the class when it matches.
fn class_match(pattern: &[u8], ch: u8) -> Option<usize> {
    let mut i = 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    loop {
        match *pattern.get(i)? {
            b']' => break,
            b'\\' => {
                matched |= *pattern.get(i + 1)? == ch;
                i += 2;
            }
            lo if pattern.get(i + 1) == Some(&b'-') && pattern.get(i + 2).is_some_and(|&c| c != b']') => {
                let hi = pattern[i + 2];
                let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
                matched |= (lo..=hi).contains(&ch);
                i += 3;
            }
            c => {
                matched |= c == ch;
                i += 1;
            }
        }
    }

    (matched != negate).then_some(i + 1)
}

//! Environment-variable expansion for install paths
//!
//! Recognizes `%VAR%`, `${VAR}` and `$VAR`. References to unset variables
//! are left exactly as written.

/// Expand references using the process environment
pub fn expand_env(input: &str) -> String {
    expand_with(input, |name| std::env::var(name).ok())
}

/// Expand references using `lookup`
pub fn expand_with<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '%' => {
                if let Some(end) = find(&chars, i + 1, '%') {
                    let name: String = chars[i + 1..end].iter().collect();
                    if is_name(&name) {
                        if let Some(value) = lookup(&name) {
                            out.push_str(&value);
                            i = end + 1;
                            continue;
                        }
                    }
                }
                out.push('%');
                i += 1;
            }
            '$' if chars.get(i + 1) == Some(&'{') => {
                if let Some(end) = find(&chars, i + 2, '}') {
                    let name: String = chars[i + 2..end].iter().collect();
                    if let Some(value) = is_name(&name).then(|| lookup(&name)).flatten() {
                        out.push_str(&value);
                    } else {
                        out.extend(&chars[i..=end]);
                    }
                    i = end + 1;
                } else {
                    out.push('$');
                    i += 1;
                }
            }
            '$' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                match is_name(&name).then(|| lookup(&name)).flatten() {
                    Some(value) => out.push_str(&value),
                    None => out.extend(&chars[i..end]),
                }
                i = end.max(i + 1);
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

fn find(chars: &[char], from: usize, target: char) -> Option<usize> {
    chars
        .get(from..)?
        .iter()
        .position(|&c| c == target)
        .map(|p| p + from)
}

fn is_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '(' || c == ')')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "ProgramFiles" => Some("C:/Program Files".to_string()),
            "HOME" => Some("/home/user".to_string()),
            "ProgramFiles(x86)" => Some("C:/Program Files (x86)".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_windows_style() {
        assert_eq!(
            expand_with("%ProgramFiles%/Demo", lookup),
            "C:/Program Files/Demo"
        );
        assert_eq!(
            expand_with("%ProgramFiles(x86)%/Demo", lookup),
            "C:/Program Files (x86)/Demo"
        );
    }

    #[test]
    fn test_unix_styles() {
        assert_eq!(expand_with("$HOME/apps", lookup), "/home/user/apps");
        assert_eq!(expand_with("${HOME}/apps", lookup), "/home/user/apps");
    }

    #[test]
    fn test_unknown_left_verbatim() {
        assert_eq!(expand_with("%NOPE%/x", lookup), "%NOPE%/x");
        assert_eq!(expand_with("${NOPE}/x", lookup), "${NOPE}/x");
        assert_eq!(expand_with("$NOPE/x", lookup), "$NOPE/x");
        assert_eq!(expand_with("100% sure $", lookup), "100% sure $");
        assert_eq!(expand_with("${unterminated", lookup), "${unterminated");
    }
}

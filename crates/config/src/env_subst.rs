/// Replace `${ENV_VAR}` and `${ENV_VAR:-fallback}` placeholders in raw config
/// text with values from the process environment.
///
/// Unresolvable variables without a fallback are left as-is so the parse
/// error (if any) points at the original placeholder.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

/// Placeholder expansion with an injectable lookup, so tests never touch the
/// process environment.
fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated: emit the remainder untouched.
            out.push_str(&rest[start..]);
            return out;
        };

        let body = &after[..end];
        let (name, fallback) = match body.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (body, None),
        };

        match (name.is_empty(), lookup(name), fallback) {
            (false, Some(value), _) => out.push_str(&value),
            (false, None, Some(fallback)) => out.push_str(fallback),
            _ => {
                out.push_str("${");
                out.push_str(body);
                out.push('}');
            },
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

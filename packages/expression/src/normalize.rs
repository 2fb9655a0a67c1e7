/// Strips `{!...}` / `{#...}` markers and rewrites `a[b]` into `a.b`.
///
/// Applied until the expression stops changing, so nested markers are fully
/// removed and `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(expression: &str) -> String {
    let mut current = normalize_once(expression);
    loop {
        let next = normalize_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// True for `{!expr}` and `{#expr}` strings
pub fn is_expression(raw: &str) -> bool {
    let raw = raw.trim();
    raw.len() >= 3 && (raw.starts_with("{!") || raw.starts_with("{#")) && raw.ends_with('}')
}

/// True for `{#expr}` (one-time binding) strings
pub fn is_unbound(raw: &str) -> bool {
    raw.trim().starts_with("{#") && is_expression(raw)
}

/// `$Label.a.b` and friends resolve against the global registry
pub fn is_global(expression: &str) -> bool {
    expression.starts_with('$')
}

fn normalize_once(expression: &str) -> String {
    let mut expression = expression.trim().to_string();

    if is_expression(&expression) {
        expression = expression[2..expression.len() - 1].trim().to_string();
    }

    let mut start = expression.find('[');
    while let Some(open) = start {
        match expression[open + 1..].find(']') {
            Some(offset) => {
                let close = open + 1 + offset;
                let inner = &expression[open + 1..close];
                // text after the bracket now starts right after the inner segment
                let resume = open + 1 + inner.len();
                expression = format!("{}.{}{}", &expression[..open], inner, &expression[close + 1..]);
                start = expression[resume..].find('[').map(|offset| resume + offset);
            }
            None => start = None,
        }
    }
    expression
}

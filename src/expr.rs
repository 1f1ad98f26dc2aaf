//! Lexical guard for user-supplied SQL scalar expressions (computed columns).

/// Scanner state while walking an expression left to right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    SingleQuote,
    DoubleQuote,
    LineComment,
    BlockComment,
}

/// Returns true iff the expression contains a statement separator (`;`) outside
/// single-quoted literals (`''` escapes an embedded quote), double-quoted
/// identifiers (`""` escapes), `--` line comments, and `/* */` block comments
/// (not nested).
///
/// An unterminated quote or block comment at end of input counts as "still
/// inside": a separator swallowed by it is not flagged. Callers reject unsafe
/// expressions before any SQL is built, so the engine never sees them.
pub fn is_unsafe(expression: &str) -> bool {
    let mut state = State::Normal;
    let mut chars = expression.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Normal => match c {
                ';' => return true,
                '\'' => state = State::SingleQuote,
                '"' => state = State::DoubleQuote,
                '-' if chars.peek() == Some(&'-') => {
                    chars.next();
                    state = State::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = State::BlockComment;
                }
                _ => {}
            },
            State::SingleQuote => {
                if c == '\'' {
                    // A doubled quote stays inside the literal.
                    if chars.peek() == Some(&'\'') {
                        chars.next();
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::DoubleQuote => {
                if c == '"' {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Normal;
                }
            }
        }
    }

    false
}

//! Tokenizer.

use notebook_kernel_core::ExecutionError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Let,
    True,
    False,
    Null,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Assign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    Comma,
    /// `;` or a newline.
    Separator,
}

/// Token with the 1-based source line it starts on.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
}

pub(crate) fn syntax_error(line: usize, message: impl Into<String>) -> ExecutionError {
    ExecutionError::new("SyntaxError", message).with_trace(&format!("line {line}"))
}

/// Split source into tokens.
///
/// # Errors
/// Returns a `SyntaxError` on an unexpected character, bad number or
/// unterminated string.
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, ExecutionError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line = 1;

    while let Some(&c) = chars.peek() {
        let token = match c {
            '\n' => {
                chars.next();
                let token = Spanned {
                    token: Token::Separator,
                    line,
                };
                line += 1;
                tokens.push(token);
                continue;
            }
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '#' => {
                while chars.peek().is_some_and(|c| *c != '\n') {
                    chars.next();
                }
                continue;
            }
            '0'..='9' => {
                let mut text = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' || d == '_' {
                        if d != '_' {
                            text.push(d);
                        }
                        chars.next();
                    } else {
                        break;
                    }
                }
                number(&text, line)?
            }
            '"' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => text.push('\n'),
                            Some('t') => text.push('\t'),
                            Some('"') => text.push('"'),
                            Some('\\') => text.push('\\'),
                            Some(other) => {
                                return Err(syntax_error(line, format!("unknown escape \\{other}")));
                            }
                            None => return Err(syntax_error(line, "unterminated string")),
                        },
                        Some('\n') | None => return Err(syntax_error(line, "unterminated string")),
                        Some(ch) => text.push(ch),
                    }
                }
                Token::Str(text)
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match ident.as_str() {
                    "let" => Token::Let,
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(ident),
                }
            }
            _ => {
                chars.next();
                let followed_by_eq = chars.next_if_eq(&'=').is_some();
                match (c, followed_by_eq) {
                    ('=', true) => Token::EqEq,
                    ('!', true) => Token::NotEq,
                    ('<', true) => Token::Le,
                    ('>', true) => Token::Ge,
                    ('=', false) => Token::Assign,
                    ('!', false) => Token::Bang,
                    ('<', false) => Token::Lt,
                    ('>', false) => Token::Gt,
                    (_, true) => return Err(syntax_error(line, format!("unexpected '{c}='"))),
                    ('+', false) => Token::Plus,
                    ('-', false) => Token::Minus,
                    ('*', false) => Token::Star,
                    ('/', false) => Token::Slash,
                    ('%', false) => Token::Percent,
                    ('(', false) => Token::LParen,
                    (')', false) => Token::RParen,
                    (',', false) => Token::Comma,
                    (';', false) => Token::Separator,
                    _ => return Err(syntax_error(line, format!("unexpected character '{c}'"))),
                }
            }
        };
        tokens.push(Spanned { token, line });
    }

    Ok(tokens)
}

fn number(text: &str, line: usize) -> Result<Token, ExecutionError> {
    if text.contains('.') {
        text.parse()
            .map(Token::Float)
            .map_err(|_| syntax_error(line, format!("invalid number '{text}'")))
    } else {
        text.parse()
            .map(Token::Int)
            .map_err(|_| syntax_error(line, format!("integer literal too large '{text}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_operators_and_literals() {
        assert_eq!(
            kinds("let x = 1.5 <= 2 # trailing"),
            vec![
                Token::Let,
                Token::Ident("x".to_string()),
                Token::Assign,
                Token::Float(1.5),
                Token::Le,
                Token::Int(2),
            ]
        );
    }

    #[test]
    fn test_lines_tracked() {
        let tokens = tokenize("a\n\"s\\n\"; b").unwrap();
        assert_eq!(tokens[2].token, Token::Str("s\n".to_string()));
        assert_eq!(tokens[2].line, 2);
        assert_eq!(tokens[3].token, Token::Separator);
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("\"abc").unwrap_err();
        assert_eq!(err.name, "SyntaxError");
    }

    #[test]
    fn test_unexpected_character() {
        assert_eq!(tokenize("1 @ 2").unwrap_err().name, "SyntaxError");
    }
}

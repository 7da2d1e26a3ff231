//! Tokenizer for sdvm assembly text.

use sdvm_common::PoolKind;

use crate::error::AsmError;

/// A single token from an assembly line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    /// An opcode mnemonic such as `add-int/lit8`. Always lowercase.
    Ident(String),
    /// A register such as `v12`.
    Register(u32),
    /// A numeric literal (decimal or hex, optionally signed).
    Number(i64),
    /// A pool reference such as `method@3`.
    Pool(PoolKind, u32),
    Comma,
    LBrace,
    RBrace,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "{s}"),
            Token::Register(r) => write!(f, "v{r}"),
            Token::Number(n) => write!(f, "{n}"),
            Token::Pool(kind, idx) => write!(f, "{}@{idx}", kind.prefix()),
            Token::Comma => write!(f, ","),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
        }
    }
}

fn parse_number(word: &str, line: usize) -> Result<i64, AsmError> {
    let invalid = || AsmError::InvalidNumber {
        line,
        token: word.to_string(),
    };
    let (negative, digits) = match word.as_bytes().first() {
        Some(b'-') => (true, &word[1..]),
        Some(b'+') => (false, &word[1..]),
        _ => (false, word),
    };
    let magnitude = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        i64::from_str_radix(hex, 16).map_err(|_| invalid())?
    } else {
        digits.parse::<i64>().map_err(|_| invalid())?
    };
    Ok(if negative { -magnitude } else { magnitude })
}

fn classify(word: &str, line: usize) -> Result<Token, AsmError> {
    if let Some(rest) = word.strip_prefix('v') {
        if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) {
            let register = rest.parse().map_err(|_| AsmError::InvalidNumber {
                line,
                token: word.to_string(),
            })?;
            return Ok(Token::Register(register));
        }
    }
    if let Some((prefix, index)) = word.split_once('@') {
        let kind = PoolKind::from_prefix(prefix).ok_or_else(|| AsmError::UnexpectedToken {
            line,
            token: word.to_string(),
        })?;
        let index = parse_number(index, line)?;
        let index = u32::try_from(index).map_err(|_| AsmError::ValueOutOfRange {
            line,
            value: index,
        })?;
        return Ok(Token::Pool(kind, index));
    }
    match word.as_bytes()[0] {
        b'0'..=b'9' | b'-' | b'+' => Ok(Token::Number(parse_number(word, line)?)),
        _ => Ok(Token::Ident(word.to_lowercase())),
    }
}

/// Tokenize a single line of assembly text.
///
/// Returns an empty Vec for blank lines and comment-only lines.
/// Comments start with `#` or `;` and extend to end of line.
pub(crate) fn tokenize_line(line: &str, line_num: usize) -> Result<Vec<Token>, AsmError> {
    let line = match line.find(|c: char| c == '#' || c == ';') {
        Some(pos) => &line[..pos],
        None => line,
    };

    let mut tokens = Vec::new();
    let mut word_start: Option<usize> = None;
    for (i, ch) in line.char_indices() {
        let punct = match ch {
            ',' => Some(Token::Comma),
            '{' => Some(Token::LBrace),
            '}' => Some(Token::RBrace),
            _ => None,
        };
        if punct.is_some() || ch.is_whitespace() {
            if let Some(start) = word_start.take() {
                tokens.push(classify(&line[start..i], line_num)?);
            }
            tokens.extend(punct);
        } else if word_start.is_none() {
            word_start = Some(i);
        }
    }
    if let Some(start) = word_start {
        tokens.push(classify(&line[start..], line_num)?);
    }

    Ok(tokens)
}

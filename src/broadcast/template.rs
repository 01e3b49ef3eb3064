//! Broadcast message templates
//!
//! Templates use printf-style conversions over three arguments, in order:
//! the tick timestamp in milliseconds, the number of messages already sent,
//! and the number of connected clients.
//!
//! Supported conversions are `%s`/`%d` (next argument), `%N$s`/`%N$d`
//! (argument N, 1-based), `%%` and `%n`.

use thiserror::Error;

/// Errors raised while rendering a template
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Unsupported conversion '%{0}' at byte {1}")]
    UnsupportedConversion(char, usize),

    #[error("Template ends with an incomplete conversion")]
    Incomplete,

    #[error("Conversion refers to missing argument {0}")]
    MissingArgument(usize),
}

/// Result type for template rendering
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Values available to a template
#[derive(Debug, Clone, Copy)]
pub struct TemplateArgs {
    pub timestamp_ms: i64,
    pub messages_sent: u64,
    pub clients: usize,
}

impl TemplateArgs {
    fn get(&self, index: usize) -> Option<String> {
        match index {
            1 => Some(self.timestamp_ms.to_string()),
            2 => Some(self.messages_sent.to_string()),
            3 => Some(self.clients.to_string()),
            _ => None,
        }
    }
}

/// Render `template` with `args`
pub fn render(template: &str, args: TemplateArgs) -> TemplateResult<String> {
    let mut out = String::with_capacity(template.len() + 16);
    let mut next_arg = 1;
    let mut chars = template.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        let mut digits = String::new();
        while let Some(&(_, d)) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            digits.push(d);
            chars.next();
        }

        let explicit = if digits.is_empty() {
            None
        } else {
            match chars.next() {
                Some((_, '$')) => Some(digits.parse::<usize>().unwrap_or(0)),
                Some((at, other)) => return Err(TemplateError::UnsupportedConversion(other, at)),
                None => return Err(TemplateError::Incomplete),
            }
        };

        let (at, conversion) = chars.next().ok_or(TemplateError::Incomplete)?;
        match (conversion, explicit) {
            ('%', None) => out.push('%'),
            ('n', None) => out.push('\n'),
            ('s' | 'd', Some(index)) => {
                out.push_str(&args.get(index).ok_or(TemplateError::MissingArgument(index))?);
            }
            ('s' | 'd', None) => {
                let index = next_arg;
                next_arg += 1;
                out.push_str(&args.get(index).ok_or(TemplateError::MissingArgument(index))?);
            }
            (other, _) => return Err(TemplateError::UnsupportedConversion(other, at)),
        }
    }

    Ok(out)
}

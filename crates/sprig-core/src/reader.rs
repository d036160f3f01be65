use crate::ast::{Datum, DatumKind, Span};
use crate::error::SprigError;

#[derive(Clone, Debug, Default)]
pub struct ReaderOptions {
    pub source_name: Option<String>,
}

pub struct Reader {
    chars: Vec<char>,
    index: usize,
    line: usize,
    col: usize,
    pub options: ReaderOptions,
}

impl Reader {
    pub fn new(src: &str) -> Self {
        Self::new_with_options(src, ReaderOptions::default())
    }

    pub fn new_with_options(src: &str, options: ReaderOptions) -> Self {
        Self {
            chars: src.chars().collect(),
            index: 0,
            line: 1,
            col: 1,
            options,
        }
    }

    pub fn read_all(&mut self) -> Result<Vec<Datum>, SprigError> {
        let mut forms = Vec::new();
        loop {
            self.skip_ws_and_comments();
            if self.eof() {
                break;
            }
            forms.push(self.read_form()?);
        }
        Ok(forms)
    }

    fn read_form(&mut self) -> Result<Datum, SprigError> {
        self.skip_ws_and_comments();
        if self.eof() {
            return self.parse_err("unexpected end of input");
        }
        let span = self.current_span();
        match self.current_char() {
            '\'' => self.read_prefixed(span, "quote"),
            '`' => self.read_prefixed(span, "syntax-quote"),
            '~' => {
                if self.peek_char() == Some('@') {
                    self.advance();
                    self.read_prefixed(span, "unquote-splicing")
                } else {
                    self.read_prefixed(span, "unquote")
                }
            }
            '^' => self.read_meta(),
            '(' => {
                self.advance();
                let items = self.read_seq(')')?;
                Ok(Datum::new(DatumKind::List(items), span))
            }
            '[' => {
                self.advance();
                let items = self.read_seq(']')?;
                Ok(Datum::new(DatumKind::Vector(items), span))
            }
            '{' => {
                self.advance();
                let items = self.read_seq('}')?;
                if items.len() % 2 != 0 {
                    return Err(SprigError::syntax("map literal must contain an even number of forms")
                        .with_span(span));
                }
                let mut entries = Vec::with_capacity(items.len() / 2);
                let mut iter = items.into_iter();
                while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                    entries.push((k, v));
                }
                Ok(Datum::new(DatumKind::Map(entries), span))
            }
            '#' => self.read_dispatch(span),
            '"' => {
                let text = self.read_string_body()?;
                Ok(Datum::new(DatumKind::Str(text), span))
            }
            '\\' => self.read_char(span),
            ':' => {
                self.advance();
                let name = self.read_token();
                if name.is_empty() {
                    return self.parse_err("empty keyword");
                }
                Ok(Datum::new(DatumKind::Keyword(name), span))
            }
            ch @ (')' | ']' | '}') => self.parse_err(format!("unexpected closing delimiter '{}'", ch)),
            _ => self.read_atom(span),
        }
    }

    fn read_prefixed(&mut self, span: Span, head: &str) -> Result<Datum, SprigError> {
        self.advance();
        let inner = self.read_form()?;
        Ok(Datum::list(vec![Datum::symbol(head, span), inner], span))
    }

    /// `^Hint form` attaches a type hint, `^:flag form` a flag.
    fn read_meta(&mut self) -> Result<Datum, SprigError> {
        self.advance();
        let meta = self.read_form()?;
        let mut target = self.read_form()?;
        match meta.kind {
            DatumKind::Symbol(hint) => target.type_hint = Some(hint),
            DatumKind::Str(hint) => target.type_hint = Some(hint),
            DatumKind::Keyword(flag) => target.flags.push(flag),
            DatumKind::Map(entries) => {
                for (k, v) in entries {
                    if let (DatumKind::Keyword(flag), DatumKind::Bool(true)) = (&k.kind, &v.kind) {
                        target.flags.push(flag.clone());
                    } else if let (DatumKind::Keyword(key), DatumKind::Symbol(hint)) = (&k.kind, &v.kind) {
                        if key == "tag" {
                            target.type_hint = Some(hint.clone());
                        }
                    }
                }
            }
            _ => return Err(SprigError::syntax("metadata must be a symbol, keyword or map").with_span(meta.span)),
        }
        Ok(target)
    }

    fn read_seq(&mut self, close: char) -> Result<Vec<Datum>, SprigError> {
        let mut items = Vec::new();
        loop {
            self.skip_ws_and_comments();
            if self.eof() {
                return self.parse_err(format!("unterminated collection, expected '{}'", close));
            }
            if self.current_char() == close {
                self.advance();
                return Ok(items);
            }
            items.push(self.read_form()?);
        }
    }

    fn read_dispatch(&mut self, span: Span) -> Result<Datum, SprigError> {
        self.advance();
        match self.current_char_opt() {
            Some('{') => {
                self.advance();
                let items = self.read_seq('}')?;
                Ok(Datum::new(DatumKind::Set(items), span))
            }
            Some('"') => {
                let pattern = self.read_regex_body()?;
                Ok(Datum::new(DatumKind::Regex(pattern), span))
            }
            Some(ch) => self.parse_err(format!("unsupported dispatch macro '#{}'", ch)),
            None => self.parse_err("unexpected end of input after '#'"),
        }
    }

    fn read_string_body(&mut self) -> Result<String, SprigError> {
        self.advance();
        let mut out = String::new();
        loop {
            let Some(ch) = self.current_char_opt() else {
                return self.parse_err("unterminated string literal");
            };
            self.advance();
            match ch {
                '"' => return Ok(out),
                '\\' => {
                    let Some(esc) = self.current_char_opt() else {
                        return self.parse_err("unterminated escape sequence");
                    };
                    self.advance();
                    match esc {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '0' => out.push('\0'),
                        '\\' => out.push('\\'),
                        '"' => out.push('"'),
                        other => return self.parse_err(format!("unknown escape '\\{}'", other)),
                    }
                }
                other => out.push(other),
            }
        }
    }

    /// Regex bodies keep their escapes verbatim.
    fn read_regex_body(&mut self) -> Result<String, SprigError> {
        self.advance();
        let mut out = String::new();
        loop {
            let Some(ch) = self.current_char_opt() else {
                return self.parse_err("unterminated regex literal");
            };
            self.advance();
            match ch {
                '"' => return Ok(out),
                '\\' => {
                    out.push('\\');
                    if let Some(next) = self.current_char_opt() {
                        out.push(next);
                        self.advance();
                    }
                }
                other => out.push(other),
            }
        }
    }

    fn read_char(&mut self, span: Span) -> Result<Datum, SprigError> {
        self.advance();
        let token = self.read_token();
        let ch = match token.as_str() {
            "newline" => '\n',
            "space" => ' ',
            "tab" => '\t',
            "return" => '\r',
            "" => match self.current_char_opt() {
                Some(c) => {
                    self.advance();
                    c
                }
                None => return self.parse_err("unexpected end of input in character literal"),
            },
            t => {
                let mut chars = t.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => c,
                    _ => return self.parse_err(format!("unsupported character literal '\\{}'", t)),
                }
            }
        };
        Ok(Datum::new(DatumKind::Char(ch), span))
    }

    fn read_atom(&mut self, span: Span) -> Result<Datum, SprigError> {
        let token = self.read_token();
        if token.is_empty() {
            return self.parse_err(format!("unexpected character '{}'", self.current_char()));
        }
        let kind = match token.as_str() {
            "nil" => DatumKind::Nil,
            "true" => DatumKind::Bool(true),
            "false" => DatumKind::Bool(false),
            t => match parse_number(t) {
                Some(kind) => kind,
                None => {
                    if starts_like_number(t) {
                        return Err(SprigError::syntax(format!("invalid number '{}'", t)).with_span(span));
                    }
                    DatumKind::Symbol(t.to_string())
                }
            },
        };
        Ok(Datum::new(kind, span))
    }

    fn read_token(&mut self) -> String {
        let mut out = String::new();
        while let Some(ch) = self.current_char_opt() {
            if is_ws_or_comma(ch) || is_delimiter(ch) {
                break;
            }
            out.push(ch);
            self.advance();
        }
        out
    }

    fn skip_ws_and_comments(&mut self) {
        while let Some(ch) = self.current_char_opt() {
            if is_ws_or_comma(ch) {
                self.advance();
            } else if ch == ';' {
                while let Some(c) = self.current_char_opt() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    fn advance(&mut self) {
        if let Some(&ch) = self.chars.get(self.index) {
            self.index += 1;
            if ch == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
    }

    fn eof(&self) -> bool {
        self.index >= self.chars.len()
    }

    fn current_char(&self) -> char {
        self.chars.get(self.index).copied().unwrap_or('\0')
    }

    fn current_char_opt(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn peek_char(&self) -> Option<char> {
        self.chars.get(self.index + 1).copied()
    }

    fn current_span(&self) -> Span {
        Span {
            line: self.line,
            col: self.col,
            index: self.index,
        }
    }

    fn parse_err<T>(&self, message: impl Into<String>) -> Result<T, SprigError> {
        Err(SprigError::syntax(message)
            .with_span(self.current_span())
            .with_source(self.options.source_name.clone()))
    }
}

fn is_ws_or_comma(ch: char) -> bool {
    ch.is_whitespace() || ch == ','
}

fn is_delimiter(ch: char) -> bool {
    matches!(ch, '(' | ')' | '[' | ']' | '{' | '}' | '"' | ';' | '\'' | '`' | '~' | '^')
}

fn starts_like_number(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some('-') | Some('+') => chars.next().is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    }
}

fn parse_number(token: &str) -> Option<DatumKind> {
    if !starts_like_number(token) {
        return None;
    }
    if let Ok(n) = token.parse::<i64>() {
        return Some(DatumKind::Int(n));
    }
    if let Some(hex) = token.strip_prefix("0x") {
        return i64::from_str_radix(hex, 16).ok().map(DatumKind::Int);
    }
    token.parse::<f64>().ok().map(DatumKind::Float)
}

pub fn read_str(src: &str) -> Result<Vec<Datum>, SprigError> {
    Reader::new(src).read_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_one(src: &str) -> Datum {
        let mut forms = read_str(src).expect("read");
        assert_eq!(forms.len(), 1, "{}", src);
        forms.remove(0)
    }

    #[test]
    fn reads_atoms_and_collections() {
        let cases = [
            ("nil", "nil"),
            ("(+ 1 2.5)", "(+ 1 2.5)"),
            ("[a :b \"c\"]", "[a :b \"c\"]"),
            ("{:a 1, :b 2}", "{:a 1 :b 2}"),
            ("#{1 2}", "#{1 2}"),
            ("'x", "(quote x)"),
            ("`(a ~b ~@c)", "(syntax-quote (a (unquote b) (unquote-splicing c)))"),
            ("\\a", "\\a"),
            ("#\"a\\d+\"", "#\"a\\d+\""),
            ("-3", "-3"),
            ("-", "-"),
        ];
        for (src, printed) in cases {
            assert_eq!(read_one(src).to_string(), printed, "{}", src);
        }
    }

    #[test]
    fn metadata_attaches_hints_and_flags() {
        let d = read_one("^String s");
        assert_eq!(d.type_hint.as_deref(), Some("String"));
        let d = read_one("^:final f");
        assert!(d.has_flag("final"));
    }

    #[test]
    fn spans_track_lines() {
        let forms = read_str("1\n  foo").expect("read");
        assert_eq!(forms[1].span.line, 2);
        assert_eq!(forms[1].span.col, 3);
    }

    #[test]
    fn errors_carry_position() {
        let err = read_str("(1 2").unwrap_err();
        assert!(matches!(err, SprigError::Syntax(_)));
        assert!(err.span().is_some());
        assert!(read_str(")").is_err());
        assert!(read_str("1abc").is_err());
    }
}

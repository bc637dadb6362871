//! Splitting migration scripts into AQL statements

use migrate_core::{DriverError, DriverResult};

/// One migration script, split into the statements the executor sends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationScript {
    statements: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Code,
    Quoted(char),
    Escaped(char),
    LineComment,
    BlockComment,
}

impl MigrationScript {
    /// Decode raw script bytes and split them
    pub fn from_bytes(bytes: &[u8]) -> DriverResult<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| DriverError::InvalidScript(format!("script is not valid UTF-8: {}", e)))?;
        Self::parse(text)
    }

    /// Split on `;` outside of quotes and comments.
    ///
    /// Comments stay inside the statement they belong to, since AQL accepts
    /// them; fragments holding nothing but whitespace and comments are
    /// dropped.
    pub fn parse(text: &str) -> DriverResult<Self> {
        let mut statements = Vec::new();
        let mut current = String::new();
        let mut has_code = false;
        let mut state = State::Code;
        let mut chars = text.chars().peekable();

        while let Some(ch) = chars.next() {
            match state {
                State::Code => match ch {
                    ';' => {
                        if has_code {
                            statements.push(current.trim().to_string());
                        }
                        current.clear();
                        has_code = false;
                        continue;
                    }
                    '"' | '\'' | '`' => {
                        state = State::Quoted(ch);
                        has_code = true;
                    }
                    '/' if chars.peek() == Some(&'/') => {
                        state = State::LineComment;
                    }
                    '/' if chars.peek() == Some(&'*') => {
                        current.push(ch);
                        if let Some(star) = chars.next() {
                            current.push(star);
                        }
                        state = State::BlockComment;
                        continue;
                    }
                    c if !c.is_whitespace() => has_code = true,
                    _ => {}
                },
                State::Quoted(quote) => match ch {
                    '\\' => state = State::Escaped(quote),
                    c if c == quote => state = State::Code,
                    _ => {}
                },
                State::Escaped(quote) => state = State::Quoted(quote),
                State::LineComment => {
                    if ch == '\n' {
                        state = State::Code;
                    }
                }
                State::BlockComment => {
                    if ch == '*' && chars.peek() == Some(&'/') {
                        current.push(ch);
                        if let Some(slash) = chars.next() {
                            current.push(slash);
                        }
                        state = State::Code;
                        continue;
                    }
                }
            }
            current.push(ch);
        }

        match state {
            State::Quoted(quote) | State::Escaped(quote) => {
                return Err(DriverError::InvalidScript(format!(
                    "unterminated {} quote in statement {}",
                    quote,
                    statements.len() + 1
                )));
            }
            State::BlockComment => {
                return Err(DriverError::InvalidScript(format!(
                    "unterminated block comment in statement {}",
                    statements.len() + 1
                )));
            }
            State::Code | State::LineComment => {}
        }

        if has_code {
            statements.push(current.trim().to_string());
        }

        Ok(Self { statements })
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(text: &str) -> Vec<String> {
        MigrationScript::parse(text).unwrap().statements().to_vec()
    }

    #[test]
    fn test_single_statement_without_terminator() {
        assert_eq!(split("FOR u IN users RETURN u"), vec!["FOR u IN users RETURN u"]);
    }

    #[test]
    fn test_multiple_statements() {
        let script = "INSERT { _key: \"a\" } INTO users;\n\nINSERT { _key: \"b\" } INTO users;\n";
        assert_eq!(
            split(script),
            vec![
                "INSERT { _key: \"a\" } INTO users",
                "INSERT { _key: \"b\" } INTO users"
            ]
        );
    }

    #[test]
    fn test_semicolons_inside_quotes() {
        let script = r#"INSERT { note: "a;b", other: 'c;d', `we;ird`: 1 } INTO t; RETURN "x\";y""#;
        assert_eq!(
            split(script),
            vec![
                r#"INSERT { note: "a;b", other: 'c;d', `we;ird`: 1 } INTO t"#,
                r#"RETURN "x\";y""#
            ]
        );
    }

    #[test]
    fn test_comments() {
        let script = "// create users; then seed\nINSERT {} INTO users; /* done; really */\n";
        assert_eq!(
            split(script),
            vec!["// create users; then seed\nINSERT {} INTO users"]
        );
    }

    #[test]
    fn test_comment_between_statements_stays_with_next() {
        let script = "RETURN 1;\n/* second */ RETURN 2";
        assert_eq!(split(script), vec!["RETURN 1", "/* second */ RETURN 2"]);
    }

    #[test]
    fn test_empty_and_blank_scripts() {
        assert!(MigrationScript::parse("").unwrap().is_empty());
        assert!(MigrationScript::parse("  \n ;; \n").unwrap().is_empty());
        assert!(MigrationScript::parse("// nothing to do\n").unwrap().is_empty());
    }

    #[test]
    fn test_division_is_not_a_comment() {
        assert_eq!(split("RETURN 4 / 2; RETURN 1"), vec!["RETURN 4 / 2", "RETURN 1"]);
    }

    #[test]
    fn test_unterminated_quote() {
        let err = MigrationScript::parse("RETURN 1; RETURN \"oops").unwrap_err();
        assert!(matches!(err, DriverError::InvalidScript(_)));
        assert!(err.to_string().contains("statement 2"));
    }

    #[test]
    fn test_unterminated_block_comment() {
        let err = MigrationScript::parse("RETURN 1 /* never closed").unwrap_err();
        assert!(matches!(err, DriverError::InvalidScript(_)));
    }

    #[test]
    fn test_invalid_utf8() {
        let err = MigrationScript::from_bytes(&[0x52, 0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, DriverError::InvalidScript(_)));
    }
}

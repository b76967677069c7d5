use std::fmt;

/// A parsed rule: its boolean condition plus any permissions a `must
/// have` clause requires in addition to the condition being true.
#[derive(Debug, Clone)]
pub struct Rule {
    pub condition: Expr,
    pub required_permissions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    True,
    BoolLit(bool),
    StrLit(String),
    IntLit(i64),
    Command,
    Bundle,
    ArgIndex(usize),
    OptionName(String),
    AnyArg,
    AnyOption,
    UserName,
    UserGroups,
    UserRoles,
    UserPermissions,
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Cmp(Box<Expr>, CmpOp, Box<Expr>),
    In(Box<Expr>, Box<Expr>),
    NotIn(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleError(pub String);

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for RuleError {}

impl Rule {
    /// Parses a rule string of the shape
    /// `allow <expr>? (must have <bundle>:<permission>)?`.
    pub fn parse(input: &str) -> Result<Self, RuleError> {
        let tokens = lex(input)?;
        let mut p = Parser { tokens, pos: 0 };
        p.expect_keyword("allow")?;

        let condition = if p.peek_is_keyword("must") || p.at_end() {
            Expr::True
        } else {
            p.parse_or()?
        };

        let required_permissions = if p.peek_is_keyword("must") {
            p.next();
            p.expect_keyword("have")?;
            let perm = p.expect_ident()?;
            vec![perm]
        } else {
            Vec::new()
        };

        if !p.at_end() {
            return Err(RuleError(format!(
                "unexpected trailing tokens near position {}",
                p.pos
            )));
        }

        Ok(Rule {
            condition,
            required_permissions,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Eq2,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn lex(input: &str) -> Result<Vec<Token>, RuleError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq2);
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Le);
                i += 2;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                let mut closed = false;
                while i < chars.len() {
                    if chars[i] == quote {
                        closed = true;
                        i += 1;
                        break;
                    }
                    s.push(chars[i]);
                    i += 1;
                }
                if !closed {
                    return Err(RuleError("unterminated string literal".to_string()));
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n: i64 = text
                    .parse()
                    .map_err(|_| RuleError(format!("bad integer literal {text:?}")))?;
                tokens.push(Token::Int(n));
            }
            c if c.is_alphanumeric() || c == '_' || c == ':' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == ':') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Ident(text));
            }
            other => {
                return Err(RuleError(format!("unexpected character {other:?}")));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn peek_is_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(kw))
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), RuleError> {
        match self.next() {
            Some(Token::Ident(s)) if s.eq_ignore_ascii_case(kw) => Ok(()),
            other => Err(RuleError(format!("expected {kw:?}, found {other:?}"))),
        }
    }

    fn expect_ident(&mut self) -> Result<String, RuleError> {
        match self.next() {
            Some(Token::Ident(s)) => Ok(s),
            other => Err(RuleError(format!("expected identifier, found {other:?}"))),
        }
    }

    // or := and ("or" and)*
    fn parse_or(&mut self) -> Result<Expr, RuleError> {
        let mut left = self.parse_and()?;
        while self.peek_is_keyword("or") {
            self.next();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    // and := unary ("and" unary)*
    fn parse_and(&mut self) -> Result<Expr, RuleError> {
        let mut left = self.parse_unary()?;
        while self.peek_is_keyword("and") {
            self.next();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    // unary := "not" unary | comparison
    fn parse_unary(&mut self) -> Result<Expr, RuleError> {
        if self.peek_is_keyword("not") {
            self.next();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    // comparison := primary ( (cmp-op | ["not"] "in") primary )?
    fn parse_comparison(&mut self) -> Result<Expr, RuleError> {
        let left = self.parse_primary()?;
        if self.peek_is_keyword("must") {
            // leave "must have ..." for the top-level rule parser
            return Ok(left);
        }
        let op = match self.peek() {
            Some(Token::Eq2) => Some(CmpOp::Eq),
            Some(Token::Ne) => Some(CmpOp::Ne),
            Some(Token::Lt) => Some(CmpOp::Lt),
            Some(Token::Le) => Some(CmpOp::Le),
            Some(Token::Gt) => Some(CmpOp::Gt),
            Some(Token::Ge) => Some(CmpOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.next();
            let right = self.parse_primary()?;
            return Ok(Expr::Cmp(Box::new(left), op, Box::new(right)));
        }
        if self.peek_is_keyword("not") {
            // lookahead for "not in"
            let save = self.pos;
            self.next();
            if self.peek_is_keyword("in") {
                self.next();
                let right = self.parse_primary()?;
                return Ok(Expr::NotIn(Box::new(left), Box::new(right)));
            }
            self.pos = save;
        }
        if self.peek_is_keyword("in") {
            self.next();
            let right = self.parse_primary()?;
            return Ok(Expr::In(Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expr, RuleError> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    other => Err(RuleError(format!("expected ')', found {other:?}"))),
                }
            }
            Some(Token::Str(s)) => Ok(Expr::StrLit(s)),
            Some(Token::Int(n)) => Ok(Expr::IntLit(n)),
            Some(Token::Ident(name)) => self.parse_ident_expr(&name),
            other => Err(RuleError(format!("unexpected token {other:?}"))),
        }
    }

    fn parse_ident_expr(&mut self, name: &str) -> Result<Expr, RuleError> {
        match name.to_ascii_lowercase().as_str() {
            "true" => return Ok(Expr::BoolLit(true)),
            "false" => return Ok(Expr::BoolLit(false)),
            "command" => return Ok(Expr::Command),
            "bundle" => return Ok(Expr::Bundle),
            "arg" => {
                self.expect(Token::LBracket)?;
                let idx = match self.next() {
                    Some(Token::Int(n)) if n >= 0 => n as usize,
                    other => return Err(RuleError(format!("expected integer index, found {other:?}"))),
                };
                self.expect(Token::RBracket)?;
                return Ok(Expr::ArgIndex(idx));
            }
            "option" => {
                self.expect(Token::LBracket)?;
                let key = match self.next() {
                    Some(Token::Str(s)) => s,
                    Some(Token::Ident(s)) => s,
                    other => return Err(RuleError(format!("expected option name, found {other:?}"))),
                };
                self.expect(Token::RBracket)?;
                return Ok(Expr::OptionName(key));
            }
            "any" => {
                self.expect(Token::LParen)?;
                let what = self.expect_ident()?;
                self.expect(Token::RParen)?;
                return match what.to_ascii_lowercase().as_str() {
                    "arg" => Ok(Expr::AnyArg),
                    "option" => Ok(Expr::AnyOption),
                    other => Err(RuleError(format!("any() of unknown kind {other:?}"))),
                };
            }
            "user" => {
                self.expect(Token::Dot)?;
                let field = self.expect_ident()?;
                return match field.as_str() {
                    "name" => Ok(Expr::UserName),
                    "groups" => Ok(Expr::UserGroups),
                    "roles" => Ok(Expr::UserRoles),
                    "permissions" => Ok(Expr::UserPermissions),
                    other => Err(RuleError(format!("unknown user field {other:?}"))),
                };
            }
            _ => {}
        }
        // A bare qualified name such as `gort:admin` appearing outside
        // of `must have` position is treated as a string literal.
        Ok(Expr::StrLit(name.to_string()))
    }

    fn expect(&mut self, expected: Token) -> Result<(), RuleError> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            other => Err(RuleError(format!("expected {expected:?}, found {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_allow() {
        let rule = Rule::parse("allow").unwrap();
        assert_eq!(rule.condition, Expr::True);
        assert!(rule.required_permissions.is_empty());
    }

    #[test]
    fn parses_must_have_clause() {
        let rule = Rule::parse("allow must have gort:admin").unwrap();
        assert_eq!(rule.condition, Expr::True);
        assert_eq!(rule.required_permissions, vec!["gort:admin".to_string()]);
    }

    #[test]
    fn parses_comparison_and_logical_operators() {
        let rule = Rule::parse(r#"allow command == "status" and not (arg[0] == "x")"#).unwrap();
        assert!(matches!(rule.condition, Expr::And(_, _)));
    }

    #[test]
    fn parses_in_and_not_in() {
        let a = Rule::parse(r#"allow user.name in ("alice", "bob")"#);
        assert!(a.is_err()); // parenthesized lists aren't literals here; exercised via membership tests in eval
        let b = Rule::parse(r#"allow arg[0] not in option[x]"#).unwrap();
        assert!(matches!(b.condition, Expr::NotIn(_, _)));
    }
}

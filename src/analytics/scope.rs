//! 范围过滤谓词
//!
//! 调用方传入的 `scope` 只能是受限语法下的布尔表达式：
//!
//! ```text
//! expr       := and_expr ("or" and_expr)*
//! and_expr   := unary ("and" unary)*
//! unary      := "not" "(" expr ")" | "(" expr ")" | comparison
//! comparison := column op literal
//! ```
//!
//! 解析成功后由语法树重新生成 KQL，原始文本不会进入查询。

use std::fmt;

use thiserror::Error;

use super::model::FlowBin;

/// 谓词最大长度
pub const MAX_SCOPE_LEN: usize = 512;
/// 最大括号嵌套深度
pub const MAX_SCOPE_DEPTH: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("scope exceeds {} characters", MAX_SCOPE_LEN)]
    TooLong,
    #[error("scope nesting exceeds {} levels", MAX_SCOPE_DEPTH)]
    TooDeep,
    #[error("unexpected character '{0}' in scope")]
    UnexpectedChar(char),
    #[error("unterminated string literal in scope")]
    UnterminatedString,
    #[error("unknown column '{0}' in scope")]
    UnknownColumn(String),
    #[error("operator '{op}' cannot be applied to column {column}")]
    OperatorMismatch { column: &'static str, op: String },
    #[error("column {0} expects a {1} literal")]
    LiteralMismatch(&'static str, &'static str),
    #[error("number out of range in scope")]
    NumberOutOfRange,
    #[error("unexpected {0} in scope")]
    Unexpected(String),
}

/// 可过滤的列
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeColumn {
    SrcVm,
    DstVm,
    DstPort,
    Bytes,
    Flows,
}

impl ScopeColumn {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "SrcVm" => Some(Self::SrcVm),
            "DstVm" => Some(Self::DstVm),
            "DstPort" => Some(Self::DstPort),
            "Bytes" => Some(Self::Bytes),
            "Flows" => Some(Self::Flows),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SrcVm => "SrcVm",
            Self::DstVm => "DstVm",
            Self::DstPort => "DstPort",
            Self::Bytes => "Bytes",
            Self::Flows => "Flows",
        }
    }

    fn is_string(&self) -> bool {
        matches!(self, Self::SrcVm | Self::DstVm)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringOp {
    Eq,
    Ne,
    Has,
    Contains,
    StartsWith,
}

impl StringOp {
    fn as_kql(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Has => "has",
            Self::Contains => "contains",
            Self::StartsWith => "startswith",
        }
    }

    fn eval(&self, haystack: &str, needle: &str) -> bool {
        match self {
            Self::Eq => haystack == needle,
            Self::Ne => haystack != needle,
            // KQL 的 has/contains/startswith 不区分大小写
            Self::Has => {
                let needle = needle.to_lowercase();
                if needle.chars().all(char::is_alphanumeric) {
                    haystack
                        .split(|c: char| !c.is_alphanumeric())
                        .any(|term| term.to_lowercase() == needle)
                } else {
                    haystack.to_lowercase().contains(&needle)
                }
            }
            Self::Contains => haystack.to_lowercase().contains(&needle.to_lowercase()),
            Self::StartsWith => haystack.to_lowercase().starts_with(&needle.to_lowercase()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl NumberOp {
    fn as_kql(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    fn eval(&self, left: i64, right: i64) -> bool {
        match self {
            Self::Eq => left == right,
            Self::Ne => left != right,
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Gt => left > right,
            Self::Ge => left >= right,
        }
    }
}

/// 已校验的过滤谓词
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopePredicate {
    And(Box<ScopePredicate>, Box<ScopePredicate>),
    Or(Box<ScopePredicate>, Box<ScopePredicate>),
    Not(Box<ScopePredicate>),
    Text {
        column: ScopeColumn,
        op: StringOp,
        value: String,
    },
    Number {
        column: ScopeColumn,
        op: NumberOp,
        value: i64,
    },
}

impl ScopePredicate {
    /// 解析并校验调用方的谓词
    pub fn parse(raw: &str) -> Result<Self, ScopeError> {
        if raw.chars().count() > MAX_SCOPE_LEN {
            return Err(ScopeError::TooLong);
        }
        let tokens = tokenize(raw)?;
        let mut parser = Parser { tokens, pos: 0 };
        let predicate = parser.expr(0)?;
        match parser.peek() {
            None => Ok(predicate),
            Some(tok) => Err(ScopeError::Unexpected(tok.describe())),
        }
    }

    /// 生成 KQL 表达式
    pub fn to_kql(&self) -> String {
        self.to_string()
    }

    /// 在单条 FlowBin 上求值
    pub fn matches(&self, bin: &FlowBin) -> bool {
        match self {
            Self::And(l, r) => l.matches(bin) && r.matches(bin),
            Self::Or(l, r) => l.matches(bin) || r.matches(bin),
            Self::Not(inner) => !inner.matches(bin),
            Self::Text { column, op, value } => {
                let field = match column {
                    ScopeColumn::SrcVm => &bin.src_vm,
                    ScopeColumn::DstVm => &bin.dst_vm,
                    _ => return false,
                };
                op.eval(field, value)
            }
            Self::Number { column, op, value } => {
                let field = match column {
                    ScopeColumn::DstPort => i64::from(bin.dst_port),
                    ScopeColumn::Bytes => bin.bytes,
                    ScopeColumn::Flows => bin.flows,
                    _ => return false,
                };
                op.eval(field, *value)
            }
        }
    }
}

impl fmt::Display for ScopePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And(l, r) => write!(f, "({} and {})", l, r),
            Self::Or(l, r) => write!(f, "({} or {})", l, r),
            Self::Not(inner) => write!(f, "not({})", inner),
            // 字面量已排除引号、反斜杠与控制字符
            Self::Text { column, op, value } => {
                write!(f, "{} {} \"{}\"", column.name(), op.as_kql(), value)
            }
            Self::Number { column, op, value } => {
                write!(f, "{} {} {}", column.name(), op.as_kql(), value)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Op(&'static str),
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Ident(s) => format!("'{}'", s),
            Self::Str(_) => "string literal".to_string(),
            Self::Int(n) => format!("'{}'", n),
            Self::Op(op) => format!("'{}'", op),
            Self::LParen => "'('".to_string(),
            Self::RParen => "')'".to_string(),
        }
    }
}

fn tokenize(raw: &str) -> Result<Vec<Token>, ScopeError> {
    let mut tokens = Vec::new();
    let mut chars = raw.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '=' | '!' | '<' | '>' => {
                chars.next();
                let followed_by_eq = chars.peek() == Some(&'=');
                let op = match (c, followed_by_eq) {
                    ('=', true) => "==",
                    ('!', true) => "!=",
                    ('<', true) => "<=",
                    ('>', true) => ">=",
                    ('<', false) => "<",
                    ('>', false) => ">",
                    _ => return Err(ScopeError::UnexpectedChar(c)),
                };
                if followed_by_eq {
                    chars.next();
                }
                tokens.push(Token::Op(op));
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => return Err(ScopeError::UnexpectedChar('\\')),
                        Some(ch) if ch.is_control() => {
                            return Err(ScopeError::UnexpectedChar(ch));
                        }
                        Some(ch) => value.push(ch),
                        None => return Err(ScopeError::UnterminatedString),
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits.push(d);
                    chars.next();
                }
                let n = digits.parse().map_err(|_| ScopeError::NumberOutOfRange)?;
                tokens.push(Token::Int(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if !(d.is_ascii_alphanumeric() || d == '_') {
                        break;
                    }
                    ident.push(d);
                    chars.next();
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(ScopeError::UnexpectedChar(other)),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(s)) if s == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ScopeError> {
        match self.next() {
            Some(tok) if tok == expected => Ok(()),
            Some(tok) => Err(ScopeError::Unexpected(tok.describe())),
            None => Err(ScopeError::Unexpected("end of scope".to_string())),
        }
    }

    fn expr(&mut self, depth: usize) -> Result<ScopePredicate, ScopeError> {
        if depth > MAX_SCOPE_DEPTH {
            return Err(ScopeError::TooDeep);
        }
        let mut left = self.and_expr(depth)?;
        while self.eat_keyword("or") {
            let right = self.and_expr(depth)?;
            left = ScopePredicate::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self, depth: usize) -> Result<ScopePredicate, ScopeError> {
        let mut left = self.unary(depth)?;
        while self.eat_keyword("and") {
            let right = self.unary(depth)?;
            left = ScopePredicate::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self, depth: usize) -> Result<ScopePredicate, ScopeError> {
        if self.eat_keyword("not") {
            self.expect(Token::LParen)?;
            let inner = self.expr(depth + 1)?;
            self.expect(Token::RParen)?;
            return Ok(ScopePredicate::Not(Box::new(inner)));
        }
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.expr(depth + 1)?;
            self.expect(Token::RParen)?;
            return Ok(inner);
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<ScopePredicate, ScopeError> {
        let column = match self.next() {
            Some(Token::Ident(name)) => {
                ScopeColumn::parse(&name).ok_or(ScopeError::UnknownColumn(name))?
            }
            Some(tok) => return Err(ScopeError::Unexpected(tok.describe())),
            None => return Err(ScopeError::Unexpected("end of scope".to_string())),
        };

        let op = match self.next() {
            Some(Token::Op(op)) => op.to_string(),
            Some(Token::Ident(word)) => word,
            Some(tok) => return Err(ScopeError::Unexpected(tok.describe())),
            None => return Err(ScopeError::Unexpected("end of scope".to_string())),
        };

        let literal = self
            .next()
            .ok_or_else(|| ScopeError::Unexpected("end of scope".to_string()))?;

        if column.is_string() {
            let op = match op.as_str() {
                "==" => StringOp::Eq,
                "!=" => StringOp::Ne,
                "has" => StringOp::Has,
                "contains" => StringOp::Contains,
                "startswith" => StringOp::StartsWith,
                _ => {
                    return Err(ScopeError::OperatorMismatch {
                        column: column.name(),
                        op,
                    });
                }
            };
            match literal {
                Token::Str(value) => Ok(ScopePredicate::Text { column, op, value }),
                _ => Err(ScopeError::LiteralMismatch(column.name(), "string")),
            }
        } else {
            let op = match op.as_str() {
                "==" => NumberOp::Eq,
                "!=" => NumberOp::Ne,
                "<" => NumberOp::Lt,
                "<=" => NumberOp::Le,
                ">" => NumberOp::Gt,
                ">=" => NumberOp::Ge,
                _ => {
                    return Err(ScopeError::OperatorMismatch {
                        column: column.name(),
                        op,
                    });
                }
            };
            match literal {
                Token::Int(value) => Ok(ScopePredicate::Number { column, op, value }),
                _ => Err(ScopeError::LiteralMismatch(column.name(), "number")),
            }
        }
    }
}

//! Formula parser
//!
//! A recursive descent parser for form formulas with proper operator precedence.

use crate::ast::{BinaryOperator, FormulaExpr, Reference, UnaryOperator};
use crate::error::{FormulaError, FormulaResult};
use lazy_regex::{regex_captures, regex_find, regex_is_match};

/// Deepest nesting of parentheses and function arguments
const MAX_NESTING: usize = 64;

/// Most operators in one formula; bounds the height of the expression tree
const MAX_OPERATORS: usize = 256;

/// Parse a formula string into an AST
///
/// # Example
/// ```rust
/// use formcalc_formula::parse_formula;
///
/// let ast = parse_formula("=1+2").unwrap();
/// let ast = parse_formula("={price} * {qty} > 100 ? \"bulk\" : \"single\"").unwrap();
/// let ast = parse_formula("=ROUND({t1:B2} / 3, 2)").unwrap();
/// assert!(parse_formula("1+2").is_err());
/// ```
pub fn parse_formula(formula: &str) -> FormulaResult<FormulaExpr> {
    let formula = formula.trim();

    // Formula must start with '='
    let formula = formula
        .strip_prefix('=')
        .ok_or_else(|| FormulaError::Parse("Formula must start with '='".into()))?;

    let tokens = Tokenizer::new(formula).tokenize()?;
    let mut parser = FormulaParser {
        tokens,
        pos: 0,
        nesting: 0,
        operators: 0,
    };
    let expr = parser.parse_expression()?;

    // Make sure we consumed all input
    if !matches!(parser.current_token(), Token::Eof) {
        return Err(FormulaError::Parse(format!(
            "Unexpected token after expression: {:?}",
            parser.current_token()
        )));
    }

    Ok(expr)
}

/// Token types
#[derive(Debug, Clone, PartialEq)]
enum Token {
    // Literals
    Number(f64),
    String(String),
    Boolean(bool),

    // Identifiers and references
    Identifier(String), // Function or constant name
    CellRef(String),    // A1
    FieldRef(String),   // {field}
    FieldCellRef { field: String, cell: String },

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Power, // ^ or **
    Bang,
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    And, // && or `and`
    Or,  // || or `or`
    Question,
    Colon,
    Comma,

    // Delimiters
    LeftParen,
    RightParen,

    // End of input
    Eof,
}

/// Splits formula text into tokens
struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn tokenize(mut self) -> FormulaResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.scan_token()?;
            let done = token == Token::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    // === Token scanning ===

    fn scan_token(&mut self) -> FormulaResult<Token> {
        self.skip_whitespace();

        let c = match self.peek_char() {
            Some(c) => c,
            None => return Ok(Token::Eof),
        };

        // Single-character tokens
        let single = match c {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '/' => Some(Token::Slash),
            '%' => Some(Token::Percent),
            '^' => Some(Token::Power),
            '?' => Some(Token::Question),
            ':' => Some(Token::Colon),
            ',' => Some(Token::Comma),
            '(' => Some(Token::LeftParen),
            ')' => Some(Token::RightParen),
            _ => None,
        };
        if let Some(token) = single {
            self.advance();
            return Ok(token);
        }

        // One- to three-character operators
        match c {
            '*' => {
                self.advance();
                return Ok(if self.eat('*') { Token::Power } else { Token::Star });
            }
            '=' => {
                self.advance();
                if !self.eat('=') {
                    return Err(FormulaError::Parse(
                        "Assignment is not allowed, use '==' to compare".into(),
                    ));
                }
                return Ok(if self.eat('=') {
                    Token::StrictEqual
                } else {
                    Token::Equal
                });
            }
            '!' => {
                self.advance();
                if !self.eat('=') {
                    return Ok(Token::Bang);
                }
                return Ok(if self.eat('=') {
                    Token::StrictNotEqual
                } else {
                    Token::NotEqual
                });
            }
            '<' => {
                self.advance();
                return Ok(if self.eat('=') {
                    Token::LessEqual
                } else {
                    Token::LessThan
                });
            }
            '>' => {
                self.advance();
                return Ok(if self.eat('=') {
                    Token::GreaterEqual
                } else {
                    Token::GreaterThan
                });
            }
            '&' | '|' => {
                self.advance();
                if !self.eat(c) {
                    return Err(FormulaError::Parse(format!(
                        "Unsupported operator '{}', did you mean '{}{}'?",
                        c, c, c
                    )));
                }
                return Ok(if c == '&' { Token::And } else { Token::Or });
            }
            _ => {}
        }

        // String literal
        if c == '"' || c == '\'' {
            return self.scan_string(c);
        }

        // Field reference
        if c == '{' {
            return self.scan_field_reference();
        }

        // Number
        if c.is_ascii_digit()
            || (c == '.' && self.peek_char_at(1).map_or(false, |c| c.is_ascii_digit()))
        {
            return Ok(self.scan_number());
        }

        // Identifier, cell reference, boolean or word operator
        if c.is_ascii_alphabetic() || c == '_' {
            return Ok(self.scan_identifier_or_ref());
        }

        Err(FormulaError::Parse(format!("Unexpected character '{}'", c)))
    }

    fn scan_string(&mut self, quote: char) -> FormulaResult<Token> {
        self.advance(); // Skip opening quote

        let mut s = String::new();
        loop {
            let c = self
                .peek_char()
                .ok_or_else(|| FormulaError::Parse("Unterminated string literal".into()))?;
            self.advance();

            if c == quote {
                return Ok(Token::String(s));
            }

            if c == '\\' {
                let escaped = self
                    .peek_char()
                    .ok_or_else(|| FormulaError::Parse("Unterminated string literal".into()))?;
                self.advance();
                s.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => other,
                });
            } else {
                s.push(c);
            }
        }
    }

    fn scan_field_reference(&mut self) -> FormulaResult<Token> {
        self.advance(); // Skip '{'

        let rest = &self.input[self.pos..];
        let end = rest
            .find('}')
            .ok_or_else(|| FormulaError::Parse("Unterminated field reference".into()))?;
        let body = &rest[..end];
        self.pos += end + 1;

        if let Some((_, field, cell)) = regex_captures!(r"^([A-Za-z0-9_]+):(.*)$", body) {
            return Ok(Token::FieldCellRef {
                field: field.to_string(),
                cell: cell.trim().to_string(),
            });
        }
        if regex_is_match!(r"^[A-Za-z0-9_]+$", body) {
            return Ok(Token::FieldRef(body.to_string()));
        }

        Err(FormulaError::Parse(format!(
            "Invalid field reference '{{{}}}'",
            body
        )))
    }

    fn scan_number(&mut self) -> Token {
        let start = self.pos;

        // Integer part
        while self.peek_char().map_or(false, |c| c.is_ascii_digit()) {
            self.advance();
        }

        // Decimal part
        if self.peek_char() == Some('.') {
            self.advance();
            while self.peek_char().map_or(false, |c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        // Exponent part, only when digits follow
        if let Some(len) = self.exponent_len() {
            self.pos += len;
        }

        let num_str = &self.input[start..self.pos];
        let num: f64 = num_str.parse().unwrap_or(0.0);
        Token::Number(num)
    }

    fn exponent_len(&self) -> Option<usize> {
        regex_find!(r"^[eE][+-]?[0-9]+", &self.input[self.pos..]).map(str::len)
    }

    fn scan_identifier_or_ref(&mut self) -> Token {
        let start = self.pos;

        // Scan identifier/reference; '.' joins namespaced names like Math.PI
        while self
            .peek_char()
            .map_or(false, |c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        {
            self.advance();
        }

        let text = &self.input[start..self.pos];
        let followed_by_paren = self.next_non_whitespace() == Some('(');

        // Boolean literals and word operators, in any case
        let lower = text.to_ascii_lowercase();
        if !followed_by_paren {
            match lower.as_str() {
                "true" => return Token::Boolean(true),
                "false" => return Token::Boolean(false),
                _ => {}
            }
        }
        match lower.as_str() {
            "and" => return Token::And,
            "or" => return Token::Or,
            _ => {}
        }

        // Uppercase letters followed by digits is a cell reference, unless it is called
        if regex_is_match!(r"^[A-Z]+[0-9]+$", text) && !followed_by_paren {
            return Token::CellRef(text.to_string());
        }

        Token::Identifier(text.to_string())
    }

    // === Helper methods ===

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_char_at(&self, offset: usize) -> Option<char> {
        self.input[self.pos..].chars().nth(offset)
    }

    fn next_non_whitespace(&self) -> Option<char> {
        self.input[self.pos..].chars().find(|c| !c.is_whitespace())
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek_char() {
            self.pos += c.len_utf8();
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek_char() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek_char().map_or(false, |c| c.is_whitespace()) {
            self.advance();
        }
    }
}

/// Formula parser
struct FormulaParser {
    tokens: Vec<Token>,
    pos: usize,
    /// Open parentheses and argument lists around the current position
    nesting: usize,
    /// Operators parsed so far
    operators: usize,
}

impl FormulaParser {
    fn current_token(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn consume(&mut self) -> Token {
        let token = self.current_token().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> FormulaResult<()> {
        if self.current_token() == expected {
            self.consume();
            Ok(())
        } else {
            Err(FormulaError::Parse(format!(
                "Expected {:?}, got {:?}",
                expected,
                self.current_token()
            )))
        }
    }

    // === Expression parsing with precedence ===
    // Precedence (lowest to highest):
    // 1. Conditional: ? :
    // 2. Logical OR: ||, or
    // 3. Logical AND: &&, and
    // 4. Equality: ==, !=, ===, !==
    // 5. Relational: <, <=, >, >=
    // 6. Additive: +, -
    // 7. Multiplicative: *, /, %
    // 8. Unary: -, +, !
    // 9. Exponentiation: ^, ** (right associative)
    // 10. Primary: literals, references, function calls, parentheses

    fn parse_expression(&mut self) -> FormulaResult<FormulaExpr> {
        if self.nesting >= MAX_NESTING {
            return Err(FormulaError::NestingTooDeep);
        }
        self.nesting += 1;
        let expr = self.parse_conditional();
        self.nesting -= 1;
        expr
    }

    fn count_operator(&mut self) -> FormulaResult<()> {
        self.operators += 1;
        if self.operators > MAX_OPERATORS {
            return Err(FormulaError::NestingTooDeep);
        }
        Ok(())
    }

    fn parse_conditional(&mut self) -> FormulaResult<FormulaExpr> {
        let condition = self.parse_or()?;

        if !matches!(self.current_token(), Token::Question) {
            return Ok(condition);
        }

        self.consume();
        self.count_operator()?;
        let then = self.parse_conditional()?;
        self.expect(&Token::Colon)?;
        let otherwise = self.parse_conditional()?; // Right associative

        Ok(FormulaExpr::Ternary {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn parse_or(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_and()?;

        while matches!(self.current_token(), Token::Or) {
            self.consume();
            self.count_operator()?;
            let right = self.parse_and()?;
            left = binary(BinaryOperator::Or, left, right);
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_equality()?;

        while matches!(self.current_token(), Token::And) {
            self.consume();
            self.count_operator()?;
            let right = self.parse_equality()?;
            left = binary(BinaryOperator::And, left, right);
        }

        Ok(left)
    }

    fn parse_equality(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_relational()?;

        loop {
            let op = match self.current_token() {
                Token::Equal => BinaryOperator::Equal,
                Token::NotEqual => BinaryOperator::NotEqual,
                Token::StrictEqual => BinaryOperator::StrictEqual,
                Token::StrictNotEqual => BinaryOperator::StrictNotEqual,
                _ => break,
            };

            self.consume();
            self.count_operator()?;
            let right = self.parse_relational()?;
            left = binary(op, left, right);
        }

        Ok(left)
    }

    fn parse_relational(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_additive()?;

        loop {
            let op = match self.current_token() {
                Token::LessThan => BinaryOperator::LessThan,
                Token::LessEqual => BinaryOperator::LessEqual,
                Token::GreaterThan => BinaryOperator::GreaterThan,
                Token::GreaterEqual => BinaryOperator::GreaterEqual,
                _ => break,
            };

            self.consume();
            self.count_operator()?;
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }

        Ok(left)
    }

    fn parse_additive(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_multiplicative()?;

        loop {
            let op = match self.current_token() {
                Token::Plus => BinaryOperator::Add,
                Token::Minus => BinaryOperator::Subtract,
                _ => break,
            };

            self.consume();
            self.count_operator()?;
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }

        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_unary()?;

        loop {
            let op = match self.current_token() {
                Token::Star => BinaryOperator::Multiply,
                Token::Slash => BinaryOperator::Divide,
                Token::Percent => BinaryOperator::Modulo,
                _ => break,
            };

            self.consume();
            self.count_operator()?;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> FormulaResult<FormulaExpr> {
        let op = match self.current_token() {
            Token::Minus => UnaryOperator::Negate,
            Token::Plus => UnaryOperator::Plus,
            Token::Bang => UnaryOperator::Not,
            _ => return self.parse_exponent(),
        };

        self.consume();
        self.count_operator()?;
        let operand = self.parse_unary()?;
        Ok(FormulaExpr::UnaryOp {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_exponent(&mut self) -> FormulaResult<FormulaExpr> {
        let left = self.parse_primary()?;

        if matches!(self.current_token(), Token::Power) {
            self.consume();
            self.count_operator()?;
            // Right associative; the exponent may carry its own sign (2^-1)
            let right = self.parse_unary()?;
            return Ok(binary(BinaryOperator::Power, left, right));
        }

        Ok(left)
    }

    fn parse_primary(&mut self) -> FormulaResult<FormulaExpr> {
        match self.consume() {
            Token::Number(n) => Ok(FormulaExpr::Number(n)),

            Token::String(s) => Ok(FormulaExpr::String(s)),

            Token::Boolean(b) => Ok(FormulaExpr::Boolean(b)),

            Token::LeftParen => {
                let expr = self.parse_expression()?;
                self.expect(&Token::RightParen)?;
                Ok(expr)
            }

            Token::FieldRef(field) => Ok(FormulaExpr::Reference(Reference::Field(field))),

            Token::FieldCellRef { field, cell } => {
                Ok(FormulaExpr::Reference(Reference::FieldCell { field, cell }))
            }

            Token::CellRef(cell) => Ok(FormulaExpr::Reference(Reference::Cell(cell))),

            Token::Identifier(name) => {
                // Check if it's a function call
                if matches!(self.current_token(), Token::LeftParen) {
                    self.parse_function_call(name)
                } else {
                    Ok(FormulaExpr::Name(name))
                }
            }

            Token::Eof => Err(FormulaError::Parse("Unexpected end of formula".into())),

            token => Err(FormulaError::Parse(format!("Unexpected token: {:?}", token))),
        }
    }

    fn parse_function_call(&mut self, name: String) -> FormulaResult<FormulaExpr> {
        self.expect(&Token::LeftParen)?;

        let mut args = Vec::new();

        // Parse arguments
        if !matches!(self.current_token(), Token::RightParen) {
            args.push(self.parse_expression()?);

            while matches!(self.current_token(), Token::Comma) {
                self.consume();
                args.push(self.parse_expression()?);
            }
        }

        self.expect(&Token::RightParen)?;

        Ok(FormulaExpr::Function {
            name: name.to_uppercase(),
            args,
        })
    }
}

fn binary(op: BinaryOperator, left: FormulaExpr, right: FormulaExpr) -> FormulaExpr {
    FormulaExpr::BinaryOp {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

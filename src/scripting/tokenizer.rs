//! Formula tokenizer
//!
//! Turns math-channel formula text into a typed token stream. Symbol binding
//! happens here: single letters `a`..`m` are parameters, `x0`, `y0` and
//! `z0`..`z9` are live channels, and a fixed set of names are functions.
//! Anything else is rejected before the formula reaches Rhai.

use crate::types::Role;

/// Functions a formula may call, with their argument counts
pub const FUNCTIONS: &[(&str, usize)] = &[
    ("sin", 1),
    ("cos", 1),
    ("tan", 1),
    ("asin", 1),
    ("acos", 1),
    ("atan", 1),
    ("atan2", 2),
    ("sinh", 1),
    ("cosh", 1),
    ("tanh", 1),
    ("sqrt", 1),
    ("exp", 1),
    ("log", 1),
    ("log10", 1),
    ("log2", 1),
    ("abs", 1),
    ("floor", 1),
    ("ceil", 1),
    ("round", 1),
    ("min", 2),
    ("max", 2),
    ("pow", 2),
    ("clamp", 3),
];

/// Number of arguments `name` takes, `None` if it is not a formula function
pub fn arity(name: &str) -> Option<usize> {
    FUNCTIONS
        .iter()
        .find(|(f, _)| *f == name)
        .map(|(_, n)| *n)
}

/// First and last parameter letter
pub const PARAMETER_LETTERS: std::ops::RangeInclusive<char> = 'a'..='m';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Parameter(char),
    Channel(Role),
    Function(&'static str),
    Number(f64),
    Operator(Operator),
    LParen,
    RParen,
    Comma,
}

/// Variable name a channel role is bound to inside formulas
pub fn channel_symbol(role: Role) -> Option<&'static str> {
    Some(match role {
        Role::Off => return None,
        Role::X => "x0",
        Role::Y => "y0",
        Role::Z0 => "z0",
        Role::Z1 => "z1",
        Role::Z2 => "z2",
        Role::Z3 => "z3",
        Role::Z4 => "z4",
        Role::Z5 => "z5",
        Role::Z6 => "z6",
        Role::Z7 => "z7",
        Role::Z8 => "z8",
        Role::Z9 => "z9",
    })
}

fn channel_for(ident: &str) -> Option<Role> {
    Role::SLOTTED
        .iter()
        .copied()
        .find(|role| channel_symbol(*role) == Some(ident))
}

/// Split a formula into tokens
///
/// The error string names the offending text and is meant for the user.
pub fn tokenize(formula: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = formula.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()))
        {
            let (value, next) = read_number(&chars, i)?;
            tokens.push(Token::Number(value));
            i = next;
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let ident: String = chars[start..i].iter().collect();
            let called = next_non_space(&chars, i) == Some('(');
            tokens.push(classify(&ident, called)?);
            continue;
        }

        let token = match c {
            '+' => Token::Operator(Operator::Add),
            '-' => Token::Operator(Operator::Sub),
            '*' => Token::Operator(Operator::Mul),
            '/' => Token::Operator(Operator::Div),
            '%' => Token::Operator(Operator::Rem),
            '^' => Token::Operator(Operator::Pow),
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            other => return Err(format!("unexpected character '{}'", other)),
        };
        tokens.push(token);
        i += 1;
    }

    if tokens.is_empty() {
        return Err("empty formula".to_string());
    }
    check_calls(&tokens)?;
    Ok(tokens)
}

/// Every function call must pass exactly as many arguments as it takes
///
/// Unbalanced parentheses are left for the parser to report.
fn check_calls(tokens: &[Token]) -> Result<(), String> {
    for (i, token) in tokens.iter().enumerate() {
        let Token::Function(name) = token else {
            continue;
        };
        let Some(expected) = arity(name) else {
            continue;
        };
        let Some(found) = count_arguments(&tokens[i + 1..]) else {
            continue;
        };
        if found != expected {
            return Err(format!(
                "function '{}' takes {} argument{}, got {}",
                name,
                expected,
                if expected == 1 { "" } else { "s" },
                found
            ));
        }
    }
    Ok(())
}

/// Arguments of the call whose opening parenthesis starts `tokens`
fn count_arguments(tokens: &[Token]) -> Option<usize> {
    if tokens.first() != Some(&Token::LParen) {
        return None;
    }
    if tokens.get(1) == Some(&Token::RParen) {
        return Some(0);
    }
    let mut depth = 0usize;
    let mut commas = 0;
    for token in tokens {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Some(commas + 1);
                }
            }
            Token::Comma if depth == 1 => commas += 1,
            _ => {}
        }
    }
    None
}

fn next_non_space(chars: &[char], from: usize) -> Option<char> {
    chars[from..].iter().copied().find(|c| !c.is_whitespace())
}

fn classify(ident: &str, called: bool) -> Result<Token, String> {
    if let Some(&(name, _)) = FUNCTIONS.iter().find(|(f, _)| *f == ident) {
        return if called {
            Ok(Token::Function(name))
        } else {
            Err(format!("function '{}' must be called", ident))
        };
    }
    if called {
        return Err(format!("'{}' is not a function", ident));
    }

    let mut letters = ident.chars();
    if let (Some(c), None) = (letters.next(), letters.next()) {
        if PARAMETER_LETTERS.contains(&c) {
            return Ok(Token::Parameter(c));
        }
    }

    if let Some(role) = channel_for(ident) {
        return Ok(Token::Channel(role));
    }

    let bytes = ident.as_bytes();
    if bytes.len() == 2 && (b'x'..=b'z').contains(&bytes[0]) && bytes[1].is_ascii_digit() {
        return Err(format!("unknown channel '{}'", ident));
    }
    Err(format!("unknown identifier '{}'", ident))
}

fn read_number(chars: &[char], start: usize) -> Result<(f64, usize), String> {
    let mut i = start;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i < chars.len() && chars[i] == '.' {
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }
    // exponent only when digits follow, so `2e` stays a number and a parameter
    if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
        let mut j = i + 1;
        if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
            j += 1;
        }
        if j < chars.len() && chars[j].is_ascii_digit() {
            while j < chars.len() && chars[j].is_ascii_digit() {
                j += 1;
            }
            i = j;
        }
    }

    let text: String = chars[start..i].iter().collect();
    let value = text
        .parse::<f64>()
        .map_err(|_| format!("invalid number '{}'", text))?;
    if !value.is_finite() {
        return Err(format!("number '{}' out of range", text));
    }
    Ok((value, i))
}

// Copyright 2019-2023 Tauri Programme within The Commons Conservancy
// SPDX-License-Identifier: Apache-2.0

//! Lexer for the config language.
//!
//! Produces a finite stream of positioned tokens. `#` starts a line comment,
//! whitespace only separates, and a `:` outside a declaration swallows the
//! rest of the line as command text (with trailing-`\` continuation), so
//! shell syntax never has to be quoted.

use std::borrow::Cow;
use std::fmt;

use crate::keyboard;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  Identifier,
  Modifier,
  Literal,
  Key,
  KeyHex,
  /// `;` followed by a mode name.
  Activate,
  /// `::`
  Decl,
  /// `.` followed by a recognized directive keyword.
  Option,
  /// `<`
  Insert,
  Dash,
  Plus,
  Comma,
  BeginList,
  EndList,
  String,
  Wildcard,
  Unbound,
  Forward,
  Arrow,
  /// `:` followed by everything up to end-of-line.
  Command,
  /// `@` followed by a group name; a bare `@` carries empty text.
  ProcessGroup,
  EndOfStream,
}

impl fmt::Display for TokenKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      TokenKind::Identifier => "identifier",
      TokenKind::Modifier => "modifier",
      TokenKind::Literal => "key literal",
      TokenKind::Key => "key",
      TokenKind::KeyHex => "hex keycode",
      TokenKind::Activate => "';'",
      TokenKind::Decl => "'::'",
      TokenKind::Option => "directive",
      TokenKind::Insert => "'<'",
      TokenKind::Dash => "'-'",
      TokenKind::Plus => "'+'",
      TokenKind::Comma => "','",
      TokenKind::BeginList => "'['",
      TokenKind::EndList => "']'",
      TokenKind::String => "string",
      TokenKind::Wildcard => "'*'",
      TokenKind::Unbound => "'~'",
      TokenKind::Forward => "'|'",
      TokenKind::Arrow => "'->'",
      TokenKind::Command => "command",
      TokenKind::ProcessGroup => "'@'",
      TokenKind::EndOfStream => "end of file",
    };
    f.pad(name)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
  pub kind: TokenKind,
  pub text: Cow<'a, str>,
  pub line: u32,
  pub column: u32,
}

/// A lex failure with the position it occurred at. The parser attaches the
/// file path when it surfaces this as a `ParseError`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
  pub line: u32,
  pub column: u32,
  pub message: String,
}

impl LexError {
  fn new(line: u32, column: u32, message: impl Into<String>) -> Self {
    LexError {
      line,
      column,
      message: message.into(),
    }
  }
}

pub struct Tokenizer<'a> {
  src: &'a str,
  pos: usize,
  line: u32,
  column: u32,
}

impl<'a> Tokenizer<'a> {
  pub fn new(src: &'a str) -> Self {
    Tokenizer {
      src,
      pos: 0,
      line: 1,
      column: 1,
    }
  }

  fn peek(&self) -> Option<char> {
    self.src[self.pos..].chars().next()
  }

  fn peek_second(&self) -> Option<char> {
    let mut chars = self.src[self.pos..].chars();
    chars.next();
    chars.next()
  }

  fn bump(&mut self) -> Option<char> {
    let c = self.peek()?;
    self.pos += c.len_utf8();
    if c == '\n' {
      self.line += 1;
      self.column = 1;
    } else {
      self.column += 1;
    }
    Some(c)
  }

  fn skip_blank(&mut self) {
    while let Some(c) = self.peek() {
      if c.is_whitespace() {
        self.bump();
      } else if c == '#' {
        while let Some(c) = self.peek() {
          if c == '\n' {
            break;
          }
          self.bump();
        }
      } else {
        break;
      }
    }
  }

  fn eat_word(&mut self) -> &'a str {
    let start = self.pos;
    while let Some(c) = self.peek() {
      if c.is_alphanumeric() || c == '_' {
        self.bump();
      } else {
        break;
      }
    }
    &self.src[start..self.pos]
  }

  pub fn next_token(&mut self) -> Result<Token<'a>, LexError> {
    self.skip_blank();
    let (line, column) = (self.line, self.column);

    let token = |kind, text: Cow<'a, str>| Token {
      kind,
      text,
      line,
      column,
    };
    let sym = |kind| token(kind, Cow::Borrowed(""));

    let c = match self.peek() {
      Some(c) => c,
      None => return Ok(sym(TokenKind::EndOfStream)),
    };

    match c {
      '<' => {
        self.bump();
        Ok(sym(TokenKind::Insert))
      }
      '+' => {
        self.bump();
        Ok(sym(TokenKind::Plus))
      }
      ',' => {
        self.bump();
        Ok(sym(TokenKind::Comma))
      }
      '[' => {
        self.bump();
        Ok(sym(TokenKind::BeginList))
      }
      ']' => {
        self.bump();
        Ok(sym(TokenKind::EndList))
      }
      '*' => {
        self.bump();
        Ok(sym(TokenKind::Wildcard))
      }
      '~' => {
        self.bump();
        Ok(sym(TokenKind::Unbound))
      }
      '|' => {
        self.bump();
        Ok(sym(TokenKind::Forward))
      }
      '-' => {
        self.bump();
        if self.peek() == Some('>') {
          self.bump();
          Ok(sym(TokenKind::Arrow))
        } else {
          Ok(sym(TokenKind::Dash))
        }
      }
      ':' => {
        self.bump();
        if self.peek() == Some(':') {
          self.bump();
          Ok(sym(TokenKind::Decl))
        } else {
          Ok(token(TokenKind::Command, self.eat_command()))
        }
      }
      ';' => {
        self.bump();
        while matches!(self.peek(), Some(c) if c == ' ' || c == '\t') {
          self.bump();
        }
        let word = self.eat_word();
        if word.is_empty() {
          Err(LexError::new(line, column, "expected mode name after ';'"))
        } else {
          Ok(token(TokenKind::Activate, Cow::Borrowed(word)))
        }
      }
      '@' => {
        self.bump();
        let word = self.eat_word();
        Ok(token(TokenKind::ProcessGroup, Cow::Borrowed(word)))
      }
      '.' => {
        self.bump();
        let word = self.eat_word();
        let lowered = word.to_ascii_lowercase();
        match lowered.as_str() {
          "load" | "shell" | "blacklist" | "define" => {
            Ok(token(TokenKind::Option, Cow::Owned(lowered)))
          }
          _ => Err(LexError::new(
            line,
            column,
            format!("unknown option '.{}'", word),
          )),
        }
      }
      '"' => {
        self.bump();
        self.eat_string(line, column).map(|text| token(TokenKind::String, text))
      }
      c if c.is_alphanumeric() || c == '_' => {
        let word = self.eat_word();
        self.classify_word(word, line, column)
      }
      c => Err(LexError::new(
        line,
        column,
        format!("unexpected character '{}'", c),
      )),
    }
  }

  /// Command text runs to end-of-line; a trailing backslash splices the next
  /// line in. Surrounding whitespace is trimmed.
  fn eat_command(&mut self) -> Cow<'a, str> {
    while matches!(self.peek(), Some(c) if c == ' ' || c == '\t') {
      self.bump();
    }
    let start = self.pos;
    let mut spliced: Option<String> = None;
    let mut segment_start = start;
    loop {
      match self.peek() {
        None | Some('\n') => break,
        Some('\\') if self.peek_second() == Some('\n') => {
          let segment = &self.src[segment_start..self.pos];
          let buf = spliced.get_or_insert_with(String::new);
          buf.push_str(segment);
          self.bump();
          self.bump();
          segment_start = self.pos;
        }
        Some(_) => {
          self.bump();
        }
      }
    }
    let tail = &self.src[segment_start..self.pos];
    match spliced {
      Some(mut buf) => {
        buf.push_str(tail);
        let trimmed = buf.trim_end().len();
        buf.truncate(trimmed);
        Cow::Owned(buf)
      }
      None => Cow::Borrowed(tail.trim_end()),
    }
  }

  /// The opening quote has been consumed. Handles `\"` and `\\` escapes;
  /// anything else after a backslash is kept verbatim.
  fn eat_string(&mut self, line: u32, column: u32) -> Result<Cow<'a, str>, LexError> {
    let start = self.pos;
    let mut unescaped: Option<String> = None;
    let mut segment_start = start;
    loop {
      match self.peek() {
        None | Some('\n') => {
          return Err(LexError::new(line, column, "unterminated string"));
        }
        Some('"') => {
          let tail = &self.src[segment_start..self.pos];
          self.bump();
          return Ok(match unescaped {
            Some(mut buf) => {
              buf.push_str(tail);
              Cow::Owned(buf)
            }
            None => Cow::Borrowed(tail),
          });
        }
        Some('\\') => {
          let next = self.peek_second();
          if next == Some('"') || next == Some('\\') {
            let segment = &self.src[segment_start..self.pos];
            let buf = unescaped.get_or_insert_with(String::new);
            buf.push_str(segment);
            self.bump();
            if let Some(escaped) = self.bump() {
              buf.push(escaped);
            }
            segment_start = self.pos;
          } else {
            self.bump();
          }
        }
        Some(_) => {
          self.bump();
        }
      }
    }
  }

  fn classify_word(&self, word: &'a str, line: u32, column: u32) -> Result<Token<'a>, LexError> {
    let token = |kind| Token {
      kind,
      text: Cow::Borrowed(word),
      line,
      column,
    };
    if word.starts_with("0x") || word.starts_with("0X") {
      let digits = &word[2..];
      if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(LexError::new(
          line,
          column,
          format!("invalid hex literal '{}'", word),
        ));
      }
      return Ok(token(TokenKind::KeyHex));
    }
    if keyboard::is_modifier_keyword(word) {
      Ok(token(TokenKind::Modifier))
    } else if keyboard::is_literal_key(word) {
      Ok(token(TokenKind::Literal))
    } else if word.chars().count() == 1 {
      Ok(token(TokenKind::Key))
    } else {
      Ok(token(TokenKind::Identifier))
    }
  }
}

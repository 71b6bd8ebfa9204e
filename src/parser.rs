// Copyright 2019-2023 Tauri Programme within The Commons Conservancy
// SPDX-License-Identifier: Apache-2.0

//! Recursive-descent parser for the config language.
//!
//! [`load`] reads a root file, parses it into a fresh [`Mappings`], then
//! resolves `.load` directives breadth-first (relative to the including
//! file, each file read at most once). Loading is atomic: the first error
//! aborts the whole load and nothing is published, so a running daemon
//! keeps its previous rules when a reload fails.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Error, ParseError, SourceLocation};
use crate::hotkey::{Hotkey, ProcessCommand, ACTIVATE_SENTINEL};
use crate::keyboard::{self, KeyPress, ModifierSet};
use crate::mappings::{Mappings, ModeId};
use crate::tokenizer::{Token, TokenKind, Tokenizer};

/// A `.load` directive, remembered until the current file finishes parsing.
struct LoadDirective {
  path: String,
  origin: SourceLocation,
}

/// Parses `root` and everything it `.load`s into a sealed rule set.
pub fn load(root: &Path) -> Result<Mappings, Error> {
  let root_abs = fs::canonicalize(root).map_err(|e| Error::Io(root.to_owned(), e))?;
  let source = fs::read_to_string(&root_abs).map_err(|e| Error::Io(root_abs.clone(), e))?;

  let mut mappings = Mappings::new();
  let mut pending = Vec::new();
  mappings.append_loaded_file(root_abs.clone());
  parse_source(&source, &root_abs, &mut mappings, &mut pending).map_err(Error::Parse)?;

  let mut queue = std::collections::VecDeque::from(pending);
  while let Some(directive) = queue.pop_front() {
    let base = directive.origin.file.parent().unwrap_or(Path::new("/"));
    let resolved = if Path::new(&directive.path).is_absolute() {
      PathBuf::from(&directive.path)
    } else {
      base.join(&directive.path)
    };
    let abs = match fs::canonicalize(&resolved) {
      Ok(abs) => abs,
      Err(e) => {
        return Err(Error::Parse(vec![ParseError::new(
          directive.origin.file,
          directive.origin.line,
          directive.origin.column,
          format!("could not load '{}': {}", directive.path, e),
        )]));
      }
    };
    if !mappings.append_loaded_file(abs.clone()) {
      continue;
    }
    let source = match fs::read_to_string(&abs) {
      Ok(source) => source,
      Err(e) => {
        return Err(Error::Parse(vec![ParseError::new(
          directive.origin.file,
          directive.origin.line,
          directive.origin.column,
          format!("could not load '{}': {}", directive.path, e),
        )]));
      }
    };
    let mut nested = Vec::new();
    parse_source(&source, &abs, &mut mappings, &mut nested).map_err(Error::Parse)?;
    queue.extend(nested);
  }

  Ok(mappings)
}

/// Parses one file's text into `mappings`, collecting its `.load`s.
fn parse_source(
  source: &str,
  file: &Path,
  mappings: &mut Mappings,
  loads: &mut Vec<LoadDirective>,
) -> Result<(), Vec<ParseError>> {
  let mut parser = Parser {
    tokenizer: Tokenizer::new(source),
    peeked: None,
    file,
    mappings,
    loads,
  };
  parser.parse_file().map_err(|e| vec![e])
}

struct Parser<'a, 'm> {
  tokenizer: Tokenizer<'a>,
  peeked: Option<Token<'a>>,
  file: &'a Path,
  mappings: &'m mut Mappings,
  loads: &'m mut Vec<LoadDirective>,
}

impl<'a, 'm> Parser<'a, 'm> {
  fn error_at(&self, line: u32, column: u32, message: impl Into<String>) -> ParseError {
    ParseError::new(self.file, line, column, message)
  }

  fn error(&self, token: &Token<'_>, message: impl Into<String>) -> ParseError {
    self.error_at(token.line, token.column, message)
  }

  fn peek(&mut self) -> Result<&Token<'a>, ParseError> {
    if self.peeked.is_none() {
      let token = self
        .tokenizer
        .next_token()
        .map_err(|e| ParseError::new(self.file, e.line, e.column, e.message))?;
      self.peeked = Some(token);
    }
    Ok(self.peeked.as_ref().expect("just peeked"))
  }

  fn advance(&mut self) -> Result<Token<'a>, ParseError> {
    self.peek()?;
    Ok(self.peeked.take().expect("just peeked"))
  }

  fn expect(&mut self, kind: TokenKind) -> Result<Token<'a>, ParseError> {
    let token = self.advance()?;
    if token.kind == kind {
      Ok(token)
    } else {
      Err(self.error(&token, format!("expected {}, found {}", kind, token.kind)))
    }
  }

  fn parse_file(&mut self) -> Result<(), ParseError> {
    loop {
      match self.peek()?.kind {
        TokenKind::EndOfStream => return Ok(()),
        TokenKind::Decl => self.parse_mode_decl()?,
        TokenKind::Option => self.parse_directive()?,
        TokenKind::Identifier
        | TokenKind::Modifier
        | TokenKind::Literal
        | TokenKind::Key
        | TokenKind::KeyHex => self.parse_hotkey()?,
        _ => {
          let token = self.advance()?;
          return Err(self.error(&token, format!("unexpected token {}", token.kind)));
        }
      }
    }
  }

  // :: name ['@'] [':' command]
  fn parse_mode_decl(&mut self) -> Result<(), ParseError> {
    self.expect(TokenKind::Decl)?;
    let name = self.expect(TokenKind::Identifier)?;

    let mut capture = false;
    if self.peek()?.kind == TokenKind::ProcessGroup {
      let marker = self.advance()?;
      if !marker.text.is_empty() {
        return Err(self.error(&marker, "unexpected group reference in mode declaration"));
      }
      capture = true;
    }

    let on_enter = if self.peek()?.kind == TokenKind::Command {
      let command = self.advance()?;
      Some(self.expand_command(&command)?)
    } else {
      None
    };

    self
      .mappings
      .declare_mode(&name.text, capture, on_enter)
      .map_err(|e| self.error(&name, e.to_string()))?;
    Ok(())
  }

  fn parse_directive(&mut self) -> Result<(), ParseError> {
    let option = self.advance()?;
    match option.text.as_ref() {
      "shell" => {
        let path = self.expect(TokenKind::String)?;
        self.mappings.set_shell(path.text.into_owned());
      }
      "blacklist" => {
        self.expect(TokenKind::BeginList)?;
        loop {
          let token = self.advance()?;
          match token.kind {
            TokenKind::String => self.mappings.add_blacklist([token.text.as_ref()]),
            TokenKind::EndList => break,
            _ => {
              return Err(self.error(
                &token,
                format!("expected string or ']', found {}", token.kind),
              ))
            }
          }
        }
      }
      "load" => {
        let path = self.expect(TokenKind::String)?;
        self.loads.push(LoadDirective {
          path: path.text.into_owned(),
          origin: SourceLocation {
            file: self.file.to_owned(),
            line: option.line,
            column: option.column,
          },
        });
      }
      "define" => self.parse_define()?,
      other => {
        // the tokenizer only passes recognized keywords through
        return Err(self.error(&option, format!("unknown option '.{}'", other)));
      }
    }
    Ok(())
  }

  // .define name '[' string (',' string)* ']'   process group
  // .define name ':' template                   command template
  fn parse_define(&mut self) -> Result<(), ParseError> {
    let name = self.expect(TokenKind::Identifier)?;
    let next = self.advance()?;
    match next.kind {
      TokenKind::BeginList => {
        let mut members = Vec::new();
        loop {
          let token = self.advance()?;
          match token.kind {
            TokenKind::String => members.push(token.text.into_owned()),
            TokenKind::Comma => {}
            TokenKind::EndList => break,
            _ => {
              return Err(self.error(
                &token,
                format!("expected string or ']', found {}", token.kind),
              ))
            }
          }
        }
        if members.is_empty() {
          return Err(self.error(&next, format!("empty process group '{}'", name.text)));
        }
        self.mappings.add_process_group(&name.text, members);
      }
      TokenKind::Command => {
        self
          .mappings
          .add_command_template(&name.text, next.text.into_owned());
      }
      _ => {
        return Err(self.error(
          &next,
          format!("expected '[' or ':' after '.define {}'", name.text),
        ))
      }
    }
    Ok(())
  }

  // [modes '<'] [mods '-'] key ['->'] action
  fn parse_hotkey(&mut self) -> Result<(), ParseError> {
    let start = {
      let (line, column) = {
        let token = self.peek()?;
        (token.line, token.column)
      };
      SourceLocation {
        file: self.file.to_owned(),
        line,
        column,
      }
    };

    let modes = self.parse_mode_preamble()?;
    let (mut modifiers, keycode) = self.parse_keypress_spec()?;

    if self.peek()?.kind == TokenKind::Arrow {
      self.advance()?;
      modifiers.insert(ModifierSet::PASSTHROUGH);
    }

    let mut hotkey = Hotkey::new(modifiers, keycode).with_location(start.clone());

    let action = self.advance()?;
    match action.kind {
      TokenKind::Activate => {
        let target = self.resolve_activation_target(&action)?;
        let command = self.maybe_command()?;
        hotkey.bind_process(ACTIVATE_SENTINEL, ProcessCommand::Activate { target, command });
      }
      TokenKind::Forward => {
        let key = self.parse_forwarded_key()?;
        hotkey.set_wildcard(ProcessCommand::Forwarded(key));
      }
      TokenKind::Command => {
        let command = self.expand_command(&action)?;
        hotkey.set_wildcard(ProcessCommand::Command(command));
      }
      TokenKind::BeginList => {
        self.parse_process_list(&mut hotkey, &action)?;
      }
      _ => {
        return Err(self.error(
          &action,
          format!("expected ':', '|', ';' or '[', found {}", action.kind),
        ))
      }
    }

    let owners = if modes.is_empty() {
      vec![Mappings::DEFAULT_MODE]
    } else {
      modes
    };
    self
      .mappings
      .add_hotkey(hotkey, &owners)
      .map_err(|e| self.error_at(start.line, start.column, e.to_string()))?;
    Ok(())
  }

  // ident (',' ident)* '<'
  fn parse_mode_preamble(&mut self) -> Result<Vec<ModeId>, ParseError> {
    let mut modes = Vec::new();
    if self.peek()?.kind != TokenKind::Identifier {
      return Ok(modes);
    }
    loop {
      let name = self.expect(TokenKind::Identifier)?;
      let id = self.mappings.mode_id(&name.text).ok_or_else(|| {
        self.error(
          &name,
          format!(
            "Mode '{}' not found. Did you forget to declare it with '::{}'?",
            name.text, name.text
          ),
        )
      })?;
      if !modes.contains(&id) {
        modes.push(id);
      }
      let next = self.advance()?;
      match next.kind {
        TokenKind::Comma => {}
        TokenKind::Insert => break,
        _ => {
          return Err(self.error(
            &next,
            format!("expected ',' or '<' after mode name, found {}", next.kind),
          ))
        }
      }
    }
    Ok(modes)
  }

  // [mod ('+' mod)* '-'] key
  fn parse_keypress_spec(&mut self) -> Result<(ModifierSet, u32), ParseError> {
    let mut modifiers = ModifierSet::empty();
    if self.peek()?.kind == TokenKind::Modifier {
      loop {
        let word = self.expect(TokenKind::Modifier)?;
        match keyboard::modifier_for_keyword(&word.text) {
          Some(set) => modifiers |= set,
          None => {
            return Err(self.error(&word, format!("unknown modifier '{}'", word.text)));
          }
        }
        if self.peek()?.kind == TokenKind::Plus {
          self.advance()?;
        } else {
          break;
        }
      }
      self.expect(TokenKind::Dash)?;
    }

    let key = self.advance()?;
    let keycode = match key.kind {
      TokenKind::Literal => {
        let (code, implicit) = keyboard::keycode_for_literal(&key.text)
          .ok_or_else(|| self.error(&key, format!("unknown key literal '{}'", key.text)))?;
        modifiers |= implicit;
        code
      }
      TokenKind::Key => {
        let c = key.text.chars().next().unwrap_or('\0');
        keyboard::keycode_for_char(c)
          .ok_or_else(|| self.error(&key, format!("unknown key '{}'", key.text)))?
      }
      TokenKind::KeyHex => u32::from_str_radix(&key.text[2..], 16)
        .map_err(|_| self.error(&key, format!("invalid hex literal '{}'", key.text)))?,
      _ => {
        return Err(self.error(&key, format!("expected a key, found {}", key.kind)));
      }
    };
    Ok((modifiers, keycode))
  }

  fn parse_forwarded_key(&mut self) -> Result<KeyPress, ParseError> {
    let (modifiers, keycode) = self.parse_keypress_spec()?;
    Ok(KeyPress::new(modifiers, keycode))
  }

  fn resolve_activation_target(&mut self, token: &Token<'_>) -> Result<String, ParseError> {
    let target = token.text.as_ref();
    if self.mappings.mode_id(target).is_none() {
      return Err(self.error(
        token,
        format!(
          "Mode '{}' not found. Did you forget to declare it with '::{}'?",
          target, target
        ),
      ));
    }
    Ok(target.to_owned())
  }

  fn maybe_command(&mut self) -> Result<Option<String>, ParseError> {
    if self.peek()?.kind == TokenKind::Command {
      let token = self.advance()?;
      Ok(Some(self.expand_command(&token)?))
    } else {
      Ok(None)
    }
  }

  // '[' procmap* ']'
  fn parse_process_list(
    &mut self,
    hotkey: &mut Hotkey,
    open: &Token<'_>,
  ) -> Result<(), ParseError> {
    let mut entries = 0usize;
    loop {
      let token = self.advance()?;
      match token.kind {
        TokenKind::EndList => break,
        TokenKind::String => {
          let command = self.parse_process_action()?;
          hotkey.bind_process(&token.text, command);
          entries += 1;
        }
        TokenKind::ProcessGroup => {
          if token.text.is_empty() {
            return Err(self.error(&token, "expected group name after '@'"));
          }
          let members = self
            .mappings
            .process_group(&token.text)
            .ok_or_else(|| {
              self.error(&token, format!("undefined process group '@{}'", token.text))
            })?
            .to_vec();
          let command = self.parse_process_action()?;
          for member in &members {
            hotkey.bind_process(member, command.clone());
          }
          entries += members.len();
        }
        TokenKind::Wildcard => {
          let command = self.parse_process_action()?;
          hotkey.set_wildcard(command);
          entries += 1;
        }
        TokenKind::EndOfStream => {
          return Err(self.error(&token, "expected ']' before end of file"));
        }
        _ => {
          return Err(self.error(
            &token,
            format!("expected string, '@', '*' or ']', found {}", token.kind),
          ));
        }
      }
    }
    if entries == 0 {
      return Err(self.error(open, "empty process list"));
    }
    Ok(())
  }

  // ':' command | '~' | '|' keypress | ';' mode [':' command]
  fn parse_process_action(&mut self) -> Result<ProcessCommand, ParseError> {
    let token = self.advance()?;
    match token.kind {
      TokenKind::Command => Ok(ProcessCommand::Command(self.expand_command(&token)?)),
      TokenKind::Unbound => Ok(ProcessCommand::Unbound),
      TokenKind::Forward => Ok(ProcessCommand::Forwarded(self.parse_forwarded_key()?)),
      TokenKind::Activate => {
        let target = self.resolve_activation_target(&token)?;
        let command = self.maybe_command()?;
        Ok(ProcessCommand::Activate { target, command })
      }
      _ => Err(self.error(
        &token,
        format!("expected ':', '~', '|' or ';', found {}", token.kind),
      )),
    }
  }

  /// Expands a `@template("arg", ...)` invocation at the head of a command.
  ///
  /// References to names that were never `.define`d stay literal: `@` is
  /// ordinary shell text and rejecting it would break existing commands.
  fn expand_command(&mut self, token: &Token<'_>) -> Result<String, ParseError> {
    let raw = token.text.as_ref();
    if !raw.starts_with('@') {
      return Ok(raw.to_owned());
    }
    let name_len = raw[1..]
      .bytes()
      .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
      .count();
    let name = &raw[1..1 + name_len];
    let template = match self.mappings.command_template(name) {
      Some(template) => template.clone(),
      None => {
        debug!("no template named '@{}'; keeping command literal", name);
        return Ok(raw.to_owned());
      }
    };

    let rest = &raw[1 + name_len..];
    let (args, remainder) = if let Some(list) = rest.strip_prefix('(') {
      self.parse_template_args(list, name, token)?
    } else {
      (Vec::new(), rest)
    };
    if args.len() != template.max_placeholder {
      return Err(self.error(
        token,
        format!(
          "template '@{}' expects {} argument(s), got {}",
          name,
          template.max_placeholder,
          args.len()
        ),
      ));
    }
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let mut expanded = template.expand(&arg_refs);
    expanded.push_str(remainder);
    Ok(expanded)
  }

  /// Parses `"a", "b", ...)` out of a command's text, returning the
  /// arguments and whatever follows the closing parenthesis.
  fn parse_template_args<'t>(
    &self,
    mut rest: &'t str,
    name: &str,
    token: &Token<'_>,
  ) -> Result<(Vec<String>, &'t str), ParseError> {
    let mut args = Vec::new();
    loop {
      rest = rest.trim_start();
      match rest.chars().next() {
        Some(')') => return Ok((args, &rest[1..])),
        Some('"') => {
          let (arg, after) = self.parse_quoted(&rest[1..], name, token)?;
          args.push(arg);
          rest = after.trim_start();
          if let Some(after_comma) = rest.strip_prefix(',') {
            rest = after_comma;
          }
        }
        Some(_) => {
          return Err(self.error(
            token,
            format!("unquoted argument in '@{}(...)' invocation", name),
          ));
        }
        None => {
          return Err(self.error(
            token,
            format!("unterminated argument list in '@{}(...)' invocation", name),
          ));
        }
      }
    }
  }

  fn parse_quoted<'t>(
    &self,
    rest: &'t str,
    name: &str,
    token: &Token<'_>,
  ) -> Result<(String, &'t str), ParseError> {
    let mut out = String::new();
    let mut chars = rest.char_indices();
    while let Some((i, c)) = chars.next() {
      match c {
        '"' => return Ok((out, &rest[i + 1..])),
        '\\' => match chars.next() {
          Some((_, escaped @ ('"' | '\\'))) => out.push(escaped),
          Some((_, other)) => {
            out.push('\\');
            out.push(other);
          }
          None => break,
        },
        _ => out.push(c),
      }
    }
    Err(self.error(
      token,
      format!("unterminated argument list in '@{}(...)' invocation", name),
    ))
  }
}

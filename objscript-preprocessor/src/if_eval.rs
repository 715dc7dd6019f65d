use objscript_foundation::errors::{Diagnostic, Label};
use objscript_lexer::token::{AnyToken, TokenKind, TokenSpan};

use crate::{PreprocessError, Preprocessor};

/// Binding power of the binary operators allowed in `#if`/`#elif` expressions, following
/// conventional C precedence. `None` means the token is not a binary operator.
fn binary_precedence(kind: TokenKind) -> Option<u8> {
    Some(match kind {
        TokenKind::Or => 1,
        TokenKind::And => 2,
        TokenKind::BitOr => 3,
        TokenKind::BitXor => 4,
        TokenKind::BitAnd => 5,
        TokenKind::Equal
        | TokenKind::NotEqual
        | TokenKind::StrictEqual
        | TokenKind::StrictNotEqual => 6,
        TokenKind::Less | TokenKind::Greater | TokenKind::LessEqual | TokenKind::GreaterEqual => 7,
        TokenKind::ShiftLeft | TokenKind::ShiftRight | TokenKind::UnsignedShiftRight => 8,
        TokenKind::Add | TokenKind::Sub => 9,
        TokenKind::Mul | TokenKind::Div | TokenKind::Rem => 10,
        _ => return None,
    })
}

/// # The `#if` constant expression evaluator
impl<'a, 's> Preprocessor<'a, 's> {
    /// Evaluates the controlling expression of `#if`/`#elif`, consuming the rest of the
    /// directive line.
    pub(crate) fn evaluate_condition(
        &mut self,
        keyword: &AnyToken,
    ) -> Result<bool, PreprocessError> {
        // Gather the logical directive line first. Comments were already split off by the
        // lexer, so a `/` reaching the parser below is always division.
        let mut line = vec![];
        loop {
            let token = self.next_directive_token()?;
            match token.kind {
                TokenKind::NewLine | TokenKind::EndOfFile => break,
                _ => line.push(token),
            }
        }
        if line.is_empty() {
            let diagnostic = Diagnostic::error(
                self.token_file(keyword),
                format!(
                    "expected expression after `#{}`",
                    self.sources.source(keyword)
                ),
            )
            .with_label(Label::primary(self.token_range(keyword), ""));
            return self.bail(TokenSpan::single(keyword.id), diagnostic);
        }

        // `defined` must see names as written; resolve it before any macro expansion.
        let resolved = self.resolve_defined(&line)?;
        let expanded = self.expand_token_list(&resolved)?;

        let mut cursor = 0;
        let value = self.parse_condition_expr(&expanded, &mut cursor, keyword, 1)?;
        if let Some(&token) = expanded.get(cursor) {
            let diagnostic = Diagnostic::error(
                self.token_file(&token),
                "unexpected token in preprocessor expression",
            )
            .with_label(Label::primary(
                self.token_range(&token),
                "the expression already ended before this token",
            ));
            return self.bail(TokenSpan::single(token.id), diagnostic);
        }
        Ok(value != 0)
    }

    /// Replaces `defined NAME` and `defined(NAME)` with `1`/`0`, bypassing expansion of the
    /// name itself.
    fn resolve_defined(&mut self, line: &[AnyToken]) -> Result<Vec<AnyToken>, PreprocessError> {
        let mut output = vec![];
        let mut i = 0;
        while i < line.len() {
            let token = line[i];
            if token.kind != TokenKind::Ident || self.sources.source(&token) != "defined" {
                output.push(token);
                i += 1;
                continue;
            }
            i += 1;
            let parenthesized = line.get(i).map_or(false, |t| t.kind == TokenKind::LeftParen);
            if parenthesized {
                i += 1;
            }
            let name_token = match line.get(i) {
                Some(&t) if t.kind == TokenKind::Ident => t,
                _ => {
                    let diagnostic = Diagnostic::error(
                        self.token_file(&token),
                        "expected macro name after `defined`",
                    )
                    .with_label(Label::primary(self.token_range(&token), ""));
                    return self.bail(TokenSpan::single(token.id), diagnostic);
                }
            };
            i += 1;
            if parenthesized {
                match line.get(i) {
                    Some(t) if t.kind == TokenKind::RightParen => i += 1,
                    _ => {
                        let diagnostic = Diagnostic::error(
                            self.token_file(&name_token),
                            "expected `)` after macro name in `defined(...)`",
                        )
                        .with_label(Label::primary(self.token_range(&name_token), ""));
                        return self.bail(TokenSpan::single(name_token.id), diagnostic);
                    }
                }
            }
            let is_defined = self.macros.is_defined(self.sources.source(&name_token));
            output.push(if is_defined {
                self.generated_one()
            } else {
                self.generated_zero()
            });
        }
        Ok(output)
    }

    fn parse_condition_expr(
        &mut self,
        tokens: &[AnyToken],
        cursor: &mut usize,
        context: &AnyToken,
        min_precedence: u8,
    ) -> Result<i64, PreprocessError> {
        let mut left = self.parse_condition_primary(tokens, cursor, context)?;
        while let Some(&operator) = tokens.get(*cursor) {
            let Some(precedence) = binary_precedence(operator.kind) else {
                break;
            };
            if precedence < min_precedence {
                break;
            }
            *cursor += 1;
            let right = self.parse_condition_expr(tokens, cursor, context, precedence + 1)?;
            left = self.apply_binary(&operator, left, right)?;
        }
        Ok(left)
    }

    fn parse_condition_primary(
        &mut self,
        tokens: &[AnyToken],
        cursor: &mut usize,
        context: &AnyToken,
    ) -> Result<i64, PreprocessError> {
        let Some(&token) = tokens.get(*cursor) else {
            let diagnostic = Diagnostic::error(
                self.token_file(context),
                "expected expression in preprocessor condition",
            )
            .with_label(Label::primary(
                self.token_range(context),
                "the expression ends too early",
            ));
            return self.bail(TokenSpan::single(context.id), diagnostic);
        };
        *cursor += 1;
        match token.kind {
            TokenKind::IntLit => self.parse_condition_integer(&token),
            TokenKind::FloatLit => {
                let diagnostic = Diagnostic::error(
                    self.token_file(&token),
                    "only decimal integer literals are allowed in preprocessor expressions",
                )
                .with_label(Label::primary(
                    self.token_range(&token),
                    "this is not an integer",
                ));
                self.bail(TokenSpan::single(token.id), diagnostic)
            }
            TokenKind::StringLit => {
                let text = self.sources.source(&token);
                let contents = text[1..text.len() - 1].trim();
                // Strings coerce to their numeric value; anything unparsable collapses to 0.
                Ok(contents.parse::<i64>().unwrap_or(0))
            }
            // Any identifier that survives macro expansion evaluates to 0; this also covers
            // reserved words, except for the boolean literals.
            TokenKind::Ident => Ok(match self.sources.source(&token) {
                "true" => 1,
                "false" => 0,
                _ => 0,
            }),
            TokenKind::LeftParen => {
                let value = self.parse_condition_expr(tokens, cursor, context, 1)?;
                match tokens.get(*cursor) {
                    Some(t) if t.kind == TokenKind::RightParen => {
                        *cursor += 1;
                        Ok(value)
                    }
                    _ => {
                        let diagnostic = Diagnostic::error(
                            self.token_file(&token),
                            "missing `)` in preprocessor expression",
                        )
                        .with_label(Label::primary(
                            self.token_range(&token),
                            "this `(` does not have a matching `)`",
                        ));
                        self.bail(TokenSpan::single(token.id), diagnostic)
                    }
                }
            }
            TokenKind::Add => self.parse_condition_primary(tokens, cursor, context),
            TokenKind::Sub => Ok(self
                .parse_condition_primary(tokens, cursor, context)?
                .wrapping_neg()),
            TokenKind::Not => Ok((self.parse_condition_primary(tokens, cursor, context)? == 0) as i64),
            TokenKind::BitNot => Ok(!self.parse_condition_primary(tokens, cursor, context)?),
            _ => {
                let diagnostic = Diagnostic::error(
                    self.token_file(&token),
                    format!(
                        "unexpected {} in preprocessor expression",
                        token.kind.name()
                    ),
                )
                .with_label(Label::primary(self.token_range(&token), ""));
                self.bail(TokenSpan::single(token.id), diagnostic)
            }
        }
    }

    fn parse_condition_integer(&mut self, token: &AnyToken) -> Result<i64, PreprocessError> {
        let text = self.sources.source(token).to_owned();
        if !text.bytes().all(|b| b.is_ascii_digit()) {
            let diagnostic = Diagnostic::error(
                self.token_file(token),
                "only decimal integer literals are allowed in preprocessor expressions",
            )
            .with_label(Label::primary(
                self.token_range(token),
                "this literal contains non-decimal characters",
            ));
            return self.bail(TokenSpan::single(token.id), diagnostic);
        }
        match text.parse::<i64>() {
            Ok(value) => Ok(value),
            Err(_) => {
                let diagnostic = Diagnostic::error(
                    self.token_file(token),
                    "integer constant is too large for a preprocessor expression",
                )
                .with_label(Label::primary(self.token_range(token), ""));
                self.bail(TokenSpan::single(token.id), diagnostic)
            }
        }
    }

    fn apply_binary(
        &mut self,
        operator: &AnyToken,
        left: i64,
        right: i64,
    ) -> Result<i64, PreprocessError> {
        Ok(match operator.kind {
            TokenKind::Add => left.wrapping_add(right),
            TokenKind::Sub => left.wrapping_sub(right),
            TokenKind::Mul => left.wrapping_mul(right),
            TokenKind::Div | TokenKind::Rem => {
                if right == 0 {
                    let diagnostic = Diagnostic::error(
                        self.token_file(operator),
                        "division by zero in preprocessor expression",
                    )
                    .with_label(Label::primary(self.token_range(operator), ""));
                    return self.bail(TokenSpan::single(operator.id), diagnostic);
                }
                if operator.kind == TokenKind::Div {
                    left.wrapping_div(right)
                } else {
                    left.wrapping_rem(right)
                }
            }
            // The surface language is ECMAScript-flavored, so shifts use its 32-bit semantics;
            // `>>>` in particular only exists there.
            TokenKind::ShiftLeft => ((left as i32).wrapping_shl(right as u32 & 31)) as i64,
            TokenKind::ShiftRight => ((left as i32).wrapping_shr(right as u32 & 31)) as i64,
            TokenKind::UnsignedShiftRight => ((left as u32).wrapping_shr(right as u32 & 31)) as i64,
            TokenKind::Less => (left < right) as i64,
            TokenKind::Greater => (left > right) as i64,
            TokenKind::LessEqual => (left <= right) as i64,
            TokenKind::GreaterEqual => (left >= right) as i64,
            // Operands are always numeric here, so strict and loose comparison coincide.
            TokenKind::Equal | TokenKind::StrictEqual => (left == right) as i64,
            TokenKind::NotEqual | TokenKind::StrictNotEqual => (left != right) as i64,
            TokenKind::BitAnd => left & right,
            TokenKind::BitOr => left | right,
            TokenKind::BitXor => left ^ right,
            // Both operands are always evaluated; the result is canonicalized to 0/1.
            TokenKind::And => ((left != 0) && (right != 0)) as i64,
            TokenKind::Or => ((left != 0) || (right != 0)) as i64,
            _ => unreachable!("gated by binary_precedence"),
        })
    }
}

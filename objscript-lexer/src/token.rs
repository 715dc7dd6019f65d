use objscript_foundation::{
    source_arena::SourceId,
    span::{Span, Spanned},
};
use std::{fmt, ops::Range};

use crate::token_stream::Channel;

pub type SourceLocation = usize;

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub source_range: Range<usize>,
}

pub type TokenId = SourceId<Token>;
pub type TokenSpan = Span<Token>;

/// Passes all the token kinds as a sequence of `Token = "name",` into the provided macro.
#[macro_export]
macro_rules! expand_tokens {
    ($x:path) => {
        $x! {
            Comment = "comment",
            NewLine = "end of line",

            Ident = "identifier",

            IntLit    = "int literal",
            FloatLit  = "float literal",
            StringLit = "string literal",
            RegexLit  = "regex literal",

            Add                      = "`+`",
            Sub                      = "`-`",
            Mul                      = "`*`",
            Div                      = "`/`",
            Rem                      = "`%`",
            Inc                      = "`++`",
            Dec                      = "`--`",
            ShiftLeft                = "`<<`",
            ShiftRight               = "`>>`",
            UnsignedShiftRight       = "`>>>`",
            BitNot                   = "`~`",
            BitAnd                   = "`&`",
            BitOr                    = "`|`",
            BitXor                   = "`^`",
            Not                      = "`!`",
            Equal                    = "`==`",
            NotEqual                 = "`!=`",
            StrictEqual              = "`===`",
            StrictNotEqual           = "`!==`",
            Less                     = "`<`",
            Greater                  = "`>`",
            LessEqual                = "`<=`",
            GreaterEqual             = "`>=`",
            And                      = "`&&`",
            Or                       = "`||`",

            Assign                   = "`=`",
            AddAssign                = "`+=`",
            SubAssign                = "`-=`",
            MulAssign                = "`*=`",
            DivAssign                = "`/=`",
            RemAssign                = "`%=`",
            ShiftLeftAssign          = "`<<=`",
            ShiftRightAssign         = "`>>=`",
            UnsignedShiftRightAssign = "`>>>=`",
            BitAndAssign             = "`&=`",
            BitOrAssign              = "`|=`",
            BitXorAssign             = "`^=`",

            Question  = "`?`",
            Colon     = "`:`",
            Dot       = "`.`",
            Ellipsis  = "`...`",
            Comma     = "`,`",
            Semi      = "`;`",

            LeftParen    = "`(`",
            RightParen   = "`)`",
            LeftBracket  = "`[`",
            RightBracket = "`]`",
            LeftBrace    = "`{`",
            RightBrace   = "`}`",

            At        = "`@`",
            Hash      = "`#`",
            HashHash  = "`##`",
            Backslash = "`\\`",

            // Used for errors produced by the lexer.
            Error = "error",
            EndOfFile = "end of file",
        }
    };
}

macro_rules! token_kind_enum {
    ($($name:tt = $pretty_name:tt),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum TokenKind {
            $($name),*
        }

        impl TokenKind {
            pub fn name(&self) -> &'static str {
                match self {
                    $(Self::$name => $pretty_name),*
                }
            }
        }
    }
}

expand_tokens!(token_kind_enum);

impl TokenKind {
    pub const fn channel(&self) -> Channel {
        match self {
            TokenKind::Comment => Channel::COMMENT,
            TokenKind::NewLine => Channel::SPACE,
            TokenKind::Error => Channel::ERROR,
            _ => Channel::CODE,
        }
    }

    /// Whether a `/` may start a regex literal when this kind precedes it. Mirrors the usual
    /// ECMAScript tokenizer heuristic: after something that can end an expression, `/` divides.
    pub fn allows_regex_after(&self) -> bool {
        !matches!(
            self,
            TokenKind::Ident
                | TokenKind::IntLit
                | TokenKind::FloatLit
                | TokenKind::StringLit
                | TokenKind::RegexLit
                | TokenKind::RightParen
                | TokenKind::RightBracket
                | TokenKind::RightBrace
                | TokenKind::Inc
                | TokenKind::Dec
        )
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AnyToken {
    pub kind: TokenKind,
    pub id: TokenId,
}

impl fmt::Debug for AnyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({:?})", self.kind, self.id)
    }
}

impl Spanned<Token> for AnyToken {
    fn span(&self) -> TokenSpan {
        TokenSpan::single(self.id)
    }
}

//! Module `parser` holds the recursive-descent parser.

use crate::ast::{BinOp, CmpOp, Decl, Expr, File, Key, StrPart, TypeKind};
use crate::token::{LexStrPart, Spanned, Tok, lex};
use crate::{Error, Result};

/// Parse_file parses a whole source file.
pub fn parse_file(filename: &str, src: &str) -> Result<File> {
    let toks = lex(filename, src)?;
    let mut p = Parser {
        file: filename.to_string(),
        toks,
        pos: 0,
    };
    p.file()
}

/// Parse_expr parses a single expression.
pub fn parse_expr(src: &str) -> Result<Expr> {
    let toks = lex("<expr>", src)?;
    let mut p = Parser {
        file: "<expr>".to_string(),
        toks,
        pos: 0,
    };
    p.skip_commas();
    let e = p.expr()?;
    p.skip_commas();
    p.expect_eof()?;
    Ok(e)
}

struct Parser {
    file: String,
    toks: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        self.toks
            .get(self.pos)
            .map(|s| &s.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn peek_at(&self, n: usize) -> &Tok {
        self.toks
            .get(self.pos + n)
            .map(|s| &s.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn bump(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.toks.len() {
            self.pos += 1;
        }
        tok
    }

    fn err<T>(&self, msg: impl Into<String>) -> Result<T> {
        let (line, col) = self
            .toks
            .get(self.pos)
            .map(|s| (s.line, s.col))
            .unwrap_or((0, 0));
        Err(Error::Parse {
            file: self.file.clone(),
            line,
            col,
            msg: msg.into(),
        })
    }

    fn expect(&mut self, want: &Tok) -> Result<()> {
        if self.peek() == want {
            self.bump();
            Ok(())
        } else {
            self.err(format!("expected {want:?}, found {:?}", self.peek()))
        }
    }

    fn expect_eof(&mut self) -> Result<()> {
        if matches!(self.peek(), Tok::Eof) {
            Ok(())
        } else {
            self.err(format!("expected end of input, found {:?}", self.peek()))
        }
    }

    fn skip_commas(&mut self) {
        while matches!(self.peek(), Tok::Comma) {
            self.bump();
        }
    }

    fn file(&mut self) -> Result<File> {
        let mut out = File {
            filename: self.file.clone(),
            ..Default::default()
        };
        self.skip_commas();

        if self.peek() == &Tok::Ident("package".into()) {
            self.bump();
            match self.bump() {
                Tok::Ident(name) => out.package = Some(name),
                t => return self.err(format!("expected package name, found {t:?}")),
            }
            self.skip_commas();
        }

        while self.peek() == &Tok::Ident("import".into()) {
            self.bump();
            match self.bump() {
                Tok::Str(parts) => out.imports.push(plain_string(&parts, self)?),
                Tok::LParen => {
                    self.skip_commas();
                    while !matches!(self.peek(), Tok::RParen) {
                        match self.bump() {
                            Tok::Str(parts) => out.imports.push(plain_string(&parts, self)?),
                            t => return self.err(format!("expected import path, found {t:?}")),
                        }
                        self.skip_commas();
                    }
                    self.bump();
                }
                t => return self.err(format!("expected import path, found {t:?}")),
            }
            self.skip_commas();
        }

        while !matches!(self.peek(), Tok::Eof) {
            out.decls.push(self.field()?);
            self.skip_commas();
        }
        Ok(out)
    }

    fn is_key_start(&self) -> bool {
        let colon_next = matches!(self.peek_at(1), Tok::Colon)
            || (matches!(self.peek_at(1), Tok::Question) && matches!(self.peek_at(2), Tok::Colon));
        matches!(self.peek(), Tok::Ident(_) | Tok::Str(_)) && colon_next
    }

    fn field(&mut self) -> Result<Decl> {
        let key = match self.bump() {
            Tok::Ident(name) => {
                if let Some(n) = name.strip_prefix('#') {
                    Key::definition(n)
                } else if let Some(n) = name.strip_prefix('_') {
                    Key::hidden(n)
                } else {
                    Key::regular(name)
                }
            }
            Tok::Str(parts) => Key::regular(plain_string(&parts, self)?),
            t => return self.err(format!("expected field label, found {t:?}")),
        };
        let optional = if matches!(self.peek(), Tok::Question) {
            self.bump();
            true
        } else {
            false
        };
        self.expect(&Tok::Colon)?;

        // `a: b: 1` shorthand nests the remainder under a struct.
        let value = if self.is_key_start() {
            Expr::Struct(vec![self.field()?])
        } else {
            self.expr()?
        };
        Ok(Decl::Field {
            key,
            optional,
            value,
        })
    }

    fn expr(&mut self) -> Result<Expr> {
        self.disjunction()
    }

    fn disjunction(&mut self) -> Result<Expr> {
        let mut e = self.branch()?;
        while matches!(self.peek(), Tok::Pipe) {
            self.bump();
            let rhs = self.branch()?;
            e = Expr::Binary(BinOp::Or, Box::new(e), Box::new(rhs));
        }
        Ok(e)
    }

    // One disjunction branch, possibly marked `*expr` as the default.
    fn branch(&mut self) -> Result<Expr> {
        if matches!(self.peek(), Tok::Star) {
            self.bump();
            let e = self.conjunct()?;
            return Ok(Expr::Default(Box::new(e)));
        }
        self.conjunct()
    }

    fn conjunct(&mut self) -> Result<Expr> {
        let mut e = self.sum()?;
        while matches!(self.peek(), Tok::Amp) {
            self.bump();
            let rhs = self.sum()?;
            e = Expr::Binary(BinOp::And, Box::new(e), Box::new(rhs));
        }
        Ok(e)
    }

    fn sum(&mut self) -> Result<Expr> {
        let mut e = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            self.bump();
            let rhs = self.term()?;
            e = Expr::Binary(op, Box::new(e), Box::new(rhs));
        }
        Ok(e)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut e = self.unary()?;
        while matches!(self.peek(), Tok::Star) {
            self.bump();
            let rhs = self.unary()?;
            e = Expr::Binary(BinOp::Mul, Box::new(e), Box::new(rhs));
        }
        Ok(e)
    }

    fn unary(&mut self) -> Result<Expr> {
        let cmp = match self.peek() {
            Tok::Gt => Some(CmpOp::Gt),
            Tok::Ge => Some(CmpOp::Ge),
            Tok::Lt => Some(CmpOp::Lt),
            Tok::Le => Some(CmpOp::Le),
            Tok::Ne => Some(CmpOp::Ne),
            _ => None,
        };
        if let Some(op) = cmp {
            self.bump();
            let e = self.unary()?;
            return Ok(Expr::Constraint(op, Box::new(e)));
        }
        if matches!(self.peek(), Tok::Minus) {
            self.bump();
            return match self.unary()? {
                Expr::Int(v) => Ok(Expr::Int(-v)),
                Expr::Float(v) => Ok(Expr::Float(-v)),
                _ => self.err("unary minus requires a numeric literal"),
            };
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut e = self.primary()?;
        loop {
            match self.peek() {
                Tok::Dot => {
                    self.bump();
                    match self.bump() {
                        Tok::Ident(name) => e = Expr::Selector(Box::new(e), name),
                        t => return self.err(format!("expected selector, found {t:?}")),
                    }
                }
                Tok::LBracket => {
                    self.bump();
                    let idx = self.expr()?;
                    self.expect(&Tok::RBracket)?;
                    e = Expr::Index(Box::new(e), Box::new(idx));
                }
                Tok::LParen => {
                    self.bump();
                    let mut args = Vec::new();
                    self.skip_commas();
                    while !matches!(self.peek(), Tok::RParen) {
                        args.push(self.expr()?);
                        self.skip_commas();
                    }
                    self.bump();
                    e = Expr::Call(Box::new(e), args);
                }
                _ => break,
            }
        }
        Ok(e)
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.bump() {
            Tok::Int(v) => Ok(Expr::Int(v)),
            Tok::Float(v) => Ok(Expr::Float(v)),
            Tok::Str(parts) => {
                let mut out = Vec::new();
                for p in parts {
                    match p {
                        LexStrPart::Lit(s) => out.push(StrPart::Lit(s)),
                        LexStrPart::Expr(src) => out.push(StrPart::Interp(parse_expr(&src)?)),
                    }
                }
                Ok(Expr::String(out))
            }
            Tok::Ident(name) => Ok(match name.as_str() {
                "null" => Expr::Null,
                "true" => Expr::Bool(true),
                "false" => Expr::Bool(false),
                "string" => Expr::Type(TypeKind::String),
                "int" => Expr::Type(TypeKind::Int),
                "float" => Expr::Type(TypeKind::Float),
                "number" => Expr::Type(TypeKind::Number),
                "bool" => Expr::Type(TypeKind::Bool),
                "bytes" => Expr::Type(TypeKind::Bytes),
                "_" => Expr::Type(TypeKind::Top),
                _ => Expr::Ident(name),
            }),
            Tok::LParen => {
                let e = self.expr()?;
                self.expect(&Tok::RParen)?;
                Ok(e)
            }
            Tok::LBrace => {
                let mut decls = Vec::new();
                self.skip_commas();
                while !matches!(self.peek(), Tok::RBrace) {
                    decls.push(self.field()?);
                    self.skip_commas();
                }
                self.bump();
                Ok(Expr::Struct(decls))
            }
            Tok::LBracket => {
                let mut items = Vec::new();
                self.skip_commas();
                while !matches!(self.peek(), Tok::RBracket) {
                    items.push(self.expr()?);
                    self.skip_commas();
                }
                self.bump();
                Ok(Expr::List(items))
            }
            t => self.err(format!("expected expression, found {t:?}")),
        }
    }
}

fn plain_string(parts: &[LexStrPart], p: &Parser) -> Result<String> {
    match parts {
        [LexStrPart::Lit(s)] => Ok(s.clone()),
        _ => p.err("interpolation is not allowed here"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::KeyKind;

    #[test]
    fn file_with_package_and_imports() {
        let f = parse_file(
            "mod.cue",
            "package hello\n\nimport \"uuid\"\n\nname: \"web\"\n",
        )
        .unwrap();
        assert_eq!(f.package.as_deref(), Some("hello"));
        assert_eq!(f.imports, vec!["uuid".to_string()]);
        assert_eq!(f.decls.len(), 1);
    }

    #[test]
    fn shorthand_nesting() {
        let f = parse_file("t.cue", "metadata: name: \"hello\"\n").unwrap();
        let Decl::Field { key, value, .. } = &f.decls[0];
        assert_eq!(key.name, "metadata");
        match value {
            Expr::Struct(inner) => {
                let Decl::Field { key, value, .. } = &inner[0];
                assert_eq!(key.name, "name");
                assert_eq!(value, &crate::ast::str("hello"));
            }
            e => panic!("unexpected: {e:?}"),
        }
    }

    #[test]
    fn definitions_and_optional() {
        let f = parse_file("t.cue", "#config: {\n\treplicas?: int & >=1\n}\n").unwrap();
        let Decl::Field { key, value, .. } = &f.decls[0];
        assert_eq!(key.kind, KeyKind::Definition);
        match value {
            Expr::Struct(inner) => {
                let Decl::Field { optional, .. } = &inner[0];
                assert!(optional);
            }
            e => panic!("unexpected: {e:?}"),
        }
    }

    #[test]
    fn disjunction_with_default() {
        let e = parse_expr("*1 | int").unwrap();
        match e {
            Expr::Binary(BinOp::Or, lhs, rhs) => {
                assert_eq!(*lhs, Expr::Default(Box::new(Expr::Int(1))));
                assert_eq!(*rhs, Expr::Type(TypeKind::Int));
            }
            e => panic!("unexpected: {e:?}"),
        }
    }

    #[test]
    fn calls_and_selectors() {
        let e = parse_expr(r#"uuid.SHA1(ns, "\(metadata.fqn):x")"#).unwrap();
        match e {
            Expr::Call(callee, args) => {
                assert_eq!(
                    *callee,
                    Expr::Selector(Box::new(Expr::Ident("uuid".into())), "SHA1".into())
                );
                assert_eq!(args.len(), 2);
            }
            e => panic!("unexpected: {e:?}"),
        }
    }

    #[test]
    fn quoted_labels() {
        let f = parse_file("t.cue", "\"app.kubernetes.io/name\": \"web\"\n").unwrap();
        let Decl::Field { key, .. } = &f.decls[0];
        assert_eq!(key.name, "app.kubernetes.io/name");
    }

    #[test]
    fn negative_literal() {
        assert_eq!(parse_expr("-100").unwrap(), Expr::Int(-100));
    }
}

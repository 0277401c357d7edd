//! The textual IR parser (§6.1): tokens → [`Module`].
//!
//! A straightforward recursive-descent parser over the token stream produced
//! by [`crate::ir::lexer::Lexer`]. It does not re-verify SSA-ness globally
//! (§3.3's invariant is the caller's responsibility); it only builds the data
//! model and resolves `ParamDependent` sizes.

use crate::common::id;
use crate::error::CompileError;
use crate::ir::lexer::{Lexer, Token, TokenKind};
use crate::ir::nodes::*;

pub fn parse(input: &str) -> Result<Module, CompileError> {
    let tokens = Lexer::lex_all(input)?;
    Parser::new(&tokens).parse_module()
}

struct Parser<'src, 'tok> {
    toks: &'tok [Token<'src>],
    pos: usize,
}

impl<'src, 'tok> Parser<'src, 'tok> {
    fn new(toks: &'tok [Token<'src>]) -> Self {
        Parser { toks, pos: 0 }
    }

    fn peek(&self) -> Option<&Token<'src>> {
        self.toks.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn bump(&mut self) -> Option<Token<'src>> {
        let t = self.toks.get(self.pos).copied();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn err(&self, msg: impl Into<String>) -> CompileError {
        match self.peek() {
            Some(t) => CompileError::ParseError(format!("{} (at {:?}, offset {})", msg.into(), t.text, t.pos)),
            None => CompileError::ParseError(format!("{} (at end of input)", msg.into())),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token<'src>, CompileError> {
        match self.peek_kind() {
            Some(k) if k == kind => Ok(self.bump().unwrap()),
            _ => Err(self.err(format!("expected {kind:?}"))),
        }
    }

    /// Consume an `Ident` token whose text matches `word` exactly.
    fn expect_word(&mut self, word: &str) -> Result<(), CompileError> {
        match self.peek() {
            Some(t) if t.kind == TokenKind::Ident && t.text == word => {
                self.bump();
                Ok(())
            }
            _ => Err(self.err(format!("expected keyword `{word}`"))),
        }
    }

    fn at_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(t) if t.kind == TokenKind::Ident && t.text == word)
    }

    fn ident(&mut self) -> Result<&'src str, CompileError> {
        Ok(self.expect(TokenKind::Ident)?.text)
    }

    /// Skip zero or more newline tokens (blank lines between statements).
    fn skip_newlines(&mut self) {
        while self.peek_kind() == Some(TokenKind::Newline) {
            self.pos += 1;
        }
    }

    fn end_of_line(&mut self) -> Result<(), CompileError> {
        self.skip_newlines_or_eof()
    }

    fn skip_newlines_or_eof(&mut self) -> Result<(), CompileError> {
        if self.peek().is_none() {
            return Ok(());
        }
        self.expect(TokenKind::Newline)?;
        self.skip_newlines();
        Ok(())
    }

    /// `%name`
    fn var_name(&mut self) -> Result<internment::Intern<String>, CompileError> {
        self.expect(TokenKind::Percent)?;
        let name = self.ident()?;
        Ok(id(name))
    }

    /// `.label`
    fn label_name(&mut self) -> Result<internment::Intern<String>, CompileError> {
        let tok = self.ident()?;
        if !tok.starts_with('.') {
            return Err(self.err("expected a `.label` name"));
        }
        Ok(id(tok))
    }

    fn size_token(&mut self) -> Result<ValueSize, CompileError> {
        let tok = self.ident()?;
        ValueSize::from_keyword(tok).ok_or_else(|| CompileError::ParseError(format!("`{tok}` is not a valid size")))
    }

    fn int_literal(&mut self) -> Result<u64, CompileError> {
        let negative = if self.peek_kind() == Some(TokenKind::Minus) {
            self.bump();
            true
        } else {
            false
        };
        let tok = self.expect(TokenKind::Int)?;
        let val: u64 = tok.text.parse().map_err(|_| self.err("invalid integer literal"))?;
        Ok(if negative { val.wrapping_neg() } else { val })
    }

    /// `<size> (%name | int)`
    fn sized_value(&mut self) -> Result<Value, CompileError> {
        let size = self.size_token()?;
        if self.peek_kind() == Some(TokenKind::Percent) {
            let name = self.var_name()?;
            Ok(Value::Variable { size, name })
        } else {
            let bits = self.int_literal()?;
            Ok(Value::Literal { size, bits })
        }
    }

    /// Comma-separated `sized_value` list, terminated by newline/EOF/`)`.
    fn operand_list(&mut self) -> Result<Vec<Value>, CompileError> {
        let mut out = Vec::new();
        if matches!(
            self.peek_kind(),
            None | Some(TokenKind::Newline) | Some(TokenKind::RParen)
        ) {
            return Ok(out);
        }
        out.push(self.sized_value()?);
        while self.peek_kind() == Some(TokenKind::Comma) {
            self.bump();
            out.push(self.sized_value()?);
        }
        Ok(out)
    }

    /// Comma-separated `.label` list inside parens: `(.a, .b)`.
    fn paren_label_list(&mut self) -> Result<Vec<internment::Intern<String>>, CompileError> {
        self.expect(TokenKind::LParen)?;
        let mut out = Vec::new();
        if self.peek_kind() != Some(TokenKind::RParen) {
            out.push(self.label_name()?);
            while self.peek_kind() == Some(TokenKind::Comma) {
                self.bump();
                out.push(self.label_name()?);
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(out)
    }

    fn parse_module(&mut self) -> Result<Module, CompileError> {
        let mut module = Module::new();
        self.skip_newlines();

        while self.peek().is_some() {
            if self.at_word("global_string") {
                self.parse_global_string(&mut module)?;
            } else if self.at_word("extern") {
                self.parse_extern(&mut module)?;
            } else if self.at_word("define") {
                self.parse_define(&mut module)?;
            } else {
                return Err(self.err("expected `global_string`, `extern`, or `define`"));
            }
            self.skip_newlines();
        }

        Ok(module)
    }

    fn parse_global_string(&mut self, module: &mut Module) -> Result<(), CompileError> {
        self.expect_word("global_string")?;
        let name = self.var_name()?;
        self.expect(TokenKind::Equals)?;
        let text = self.expect(TokenKind::Str)?.text;
        self.end_of_line()?;
        module.global_strings.push(GlobalString {
            name,
            bytes: text.as_bytes().to_vec(),
        });
        Ok(())
    }

    fn parse_params(&mut self) -> Result<Vec<(ValueSize, internment::Intern<String>)>, CompileError> {
        self.expect(TokenKind::LParen)?;
        let mut out = Vec::new();
        if self.peek_kind() != Some(TokenKind::RParen) {
            loop {
                let size = self.size_token()?;
                let name = self.var_name()?;
                out.push((size, name));
                if self.peek_kind() == Some(TokenKind::Comma) {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(out)
    }

    fn parse_extern(&mut self, module: &mut Module) -> Result<(), CompileError> {
        self.expect_word("extern")?;
        self.expect_word("fn")?;
        let return_size = self.size_token()?;
        let name = id(self.ident()?);
        let params = self.parse_params()?;
        self.end_of_line()?;
        module.externs.push(ExternFunction {
            name,
            params: params.into_iter().map(|(s, _)| s).collect(),
            return_size,
        });
        Ok(())
    }

    fn parse_define(&mut self, module: &mut Module) -> Result<(), CompileError> {
        self.expect_word("define")?;
        self.expect_word("fn")?;
        let return_size = self.size_token()?;
        let name = id(self.ident()?);
        let params = self.parse_params()?;
        self.end_of_line()?;

        let blocks = self.parse_block_body()?;

        self.expect_word("end")?;
        self.end_of_line()?;

        module.functions.push(Function {
            name,
            params: params
                .into_iter()
                .map(|(size, name)| Param { size, name })
                .collect(),
            return_size,
            blocks,
        });
        Ok(())
    }

    /// A sequence of instructions, optionally partitioned by `.label:` lines.
    /// The first block is implicitly named `entry` if no label precedes it.
    fn parse_block_body(&mut self) -> Result<Vec<Block>, CompileError> {
        let mut blocks: Vec<Block> = Vec::new();
        self.skip_newlines();

        while self.peek().is_some() && !self.at_word("end") {
            if self.is_label_start() {
                let name = self.label_name()?;
                self.expect(TokenKind::Colon)?;
                self.end_of_line()?;
                blocks.push(Block::new(name));
            } else if blocks.is_empty() {
                blocks.push(Block::new(id("entry")));
            }

            let inst = self.parse_instruction()?;
            blocks.last_mut().unwrap().instructions.push(inst);
            self.skip_newlines();
        }

        Ok(blocks)
    }

    /// A label line is `.ident :` — distinguished from an instruction whose
    /// opcode happens to be an ident by requiring the following token to be
    /// a colon.
    fn is_label_start(&self) -> bool {
        matches!(self.peek(), Some(t) if t.kind == TokenKind::Ident && t.text.starts_with('.'))
            && matches!(self.toks.get(self.pos + 1), Some(t) if t.kind == TokenKind::Colon)
    }

    fn parse_instruction(&mut self) -> Result<Instruction, CompileError> {
        let assignee = if self.peek_kind() == Some(TokenKind::Percent) {
            let save = self.pos;
            let name = self.var_name()?;
            if self.peek_kind() == Some(TokenKind::Equals) {
                self.bump();
                Some(name)
            } else {
                self.pos = save;
                None
            }
        } else {
            None
        };

        let opcode = self.ident()?.to_string();

        let (op, operands, result_size) = match opcode.as_str() {
            "literal" => {
                let size = self.size_token()?;
                let bits = self.int_literal()?;
                (Op::Literal, vec![Value::Literal { size, bits }], size)
            }
            "allocate" => {
                let bytes = self.int_literal()? as u32;
                (Op::Allocate { bytes }, vec![], ValueSize::Ptr)
            }
            "store" => {
                let size = self.size_token()?;
                let operands = self.operand_list()?;
                (Op::Store { size }, operands, ValueSize::None)
            }
            "load" => {
                let size = self.size_token()?;
                let operands = self.operand_list()?;
                (Op::Load { size }, operands, size)
            }
            "icmp" => {
                let kind = self.icmp_kind()?;
                let operands = self.operand_list()?;
                (Op::Icmp { kind }, operands, ValueSize::I1)
            }
            "branch" => {
                let if_true = self.label_name()?;
                self.expect(TokenKind::Comma)?;
                let if_false = self.label_name()?;
                let operands = self.operand_list()?;
                (Op::Branch { if_true, if_false }, operands, ValueSize::None)
            }
            "jmp" => {
                let target = self.label_name()?;
                (Op::Jmp { target }, vec![], ValueSize::None)
            }
            "ret" => {
                let operands = self.operand_list()?;
                (Op::Ret, operands, ValueSize::None)
            }
            "arithmetic" => {
                let kind = self.arith_kind()?;
                let operands = self.operand_list()?;
                let size = operands.first().map(|v| v.size()).unwrap_or(ValueSize::I32);
                (Op::Arithmetic { kind }, operands, size)
            }
            "call" => {
                let return_size = self.size_token()?;
                let target = id(self.ident()?);
                self.expect(TokenKind::LParen)?;
                let operands = self.operand_list()?;
                self.expect(TokenKind::RParen)?;
                (Op::Call { target }, operands, return_size)
            }
            "phi" => {
                let labels = self.paren_label_list()?;
                let operands = self.operand_list()?;
                if labels.len() != operands.len() {
                    return Err(CompileError::PhiArityMismatch {
                        labels: labels.len(),
                        operands: operands.len(),
                    });
                }
                let size = operands.first().map(|v| v.size()).unwrap_or(ValueSize::I32);
                (Op::Phi { labels }, operands, size)
            }
            "select" => {
                let operands = self.operand_list()?;
                let size = operands.get(1).map(|v| v.size()).unwrap_or(ValueSize::I32);
                (Op::Select, operands, size)
            }
            "sext" => {
                let target = self.size_token()?;
                let operands = self.operand_list()?;
                (Op::Sext { target }, operands, target)
            }
            "zext" => {
                let target = self.size_token()?;
                let operands = self.operand_list()?;
                (Op::Zext { target }, operands, target)
            }
            "get_array_ptr" => {
                let element_size = self.size_token()?;
                let operands = self.operand_list()?;
                (Op::GetArrayPtr { element_size }, operands, ValueSize::Ptr)
            }
            other => return Err(self.err(format!("unknown opcode `{other}`"))),
        };

        self.end_of_line()?;
        Ok(Instruction::new(op, operands, assignee, result_size))
    }

    fn icmp_kind(&mut self) -> Result<IcmpKind, CompileError> {
        let tok = self.ident()?;
        IcmpKind::from_keyword(tok).ok_or_else(|| CompileError::ParseError(format!("`{tok}` is not an icmp predicate")))
    }

    fn arith_kind(&mut self) -> Result<ArithKind, CompileError> {
        let tok = self.ident()?;
        ArithKind::from_keyword(tok).ok_or_else(|| CompileError::ParseError(format!("`{tok}` is not an arithmetic op")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_function() {
        let src = "define fn i32 main()\n\
                    %x = literal i32 42\n\
                    ret i32 %x\n\
                    end\n";
        let module = parse(src).unwrap();
        assert_eq!(module.functions.len(), 1);
        let f = &module.functions[0];
        assert_eq!(f.name.as_str(), "main");
        assert_eq!(f.blocks.len(), 1);
        assert_eq!(f.blocks[0].name.as_str(), "entry");
        assert_eq!(f.blocks[0].instructions.len(), 2);
    }

    #[test]
    fn parses_labeled_blocks_and_branch() {
        let src = "define fn i32 main()\n\
                    %c = icmp slt i32 1, i32 2\n\
                    branch .t, .f i1 %c\n\
                    .t:\n\
                    ret i32 1\n\
                    .f:\n\
                    ret i32 0\n\
                    end\n";
        let module = parse(src).unwrap();
        let f = &module.functions[0];
        assert_eq!(f.blocks.len(), 3);
        assert_eq!(f.blocks[1].name.as_str(), ".t");
        assert_eq!(f.blocks[2].name.as_str(), ".f");
    }

    #[test]
    fn parses_phi_and_call() {
        let src = "extern fn i32 helper(i32)\n\
                    define fn i32 main()\n\
                    %r = call i32 helper(i32 1)\n\
                    %p = phi(.entry) i32 %r\n\
                    ret i32 %p\n\
                    end\n";
        let module = parse(src).unwrap();
        assert_eq!(module.externs.len(), 1);
        let f = &module.functions[0];
        assert!(matches!(f.blocks[0].instructions[1].op, Op::Phi { .. }));
    }

    #[test]
    fn global_string_round_trips_bytes() {
        let src = "global_string %s = \"hi\"\n\
                    define fn void main()\n\
                    ret\n\
                    end\n";
        let module = parse(src).unwrap();
        assert_eq!(module.global_strings[0].bytes, b"hi");
    }

    #[test]
    fn rejects_unknown_opcode() {
        assert!(parse("define fn i32 main()\nbogus\nend\n").is_err());
    }
}

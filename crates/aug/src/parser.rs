//! Recursive-descent parser with a Shunting-Yard expression core.
//!
//! Statements and structural forms are parsed by recursive descent;
//! expressions run through an operator stack keyed on the precedence table
//! embedded in [`TokenKind`]. On error a diagnostic with a source hint is
//! recorded and the current production returns `None`; the parse aborts and
//! partial subtrees are dropped.

use crate::{
    ast::{Node, NodeKind},
    error::{EngineError, ErrorKind, SourceLoc, render_hint},
    input::Input,
    lexer::{Lexer, Token, TokenKind},
    resource::EngineOptions,
};

/// One entry on the Shunting-Yard operator stack.
struct OpEntry {
    token: Token,
    unary: bool,
}

impl OpEntry {
    fn prec(&self) -> u8 {
        if self.unary {
            // unary operators bind at the `!` level
            TokenKind::Not.prec()
        } else {
            self.token.kind.prec()
        }
    }
}

pub(crate) struct Parser {
    lexer: Lexer,
    require_semicolons: bool,
    allow_unbraced_blocks: bool,
    errors: Vec<EngineError>,
}

impl Parser {
    pub fn new(input: Input, options: &EngineOptions) -> Self {
        Self {
            lexer: Lexer::new(input),
            require_semicolons: options.require_semicolons,
            allow_unbraced_blocks: options.allow_unbraced_blocks,
            errors: Vec::new(),
        }
    }

    pub fn input(&self) -> &Input {
        self.lexer.input()
    }

    /// Lexer errors first (they precede parse errors positionally), then
    /// parser errors.
    pub fn take_errors(&mut self) -> Vec<EngineError> {
        let mut errors = self.lexer.take_errors();
        errors.append(&mut self.errors);
        errors
    }

    /// Parses the whole input into a root node, or `None` after an error.
    pub fn parse(&mut self) -> Option<Node> {
        self.bump();
        let mut root = Node::new(NodeKind::Root, Token::default());
        while self.kind() != TokenKind::End {
            if self.kind() == TokenKind::Semicolon {
                self.bump();
                continue;
            }
            let stmt = self.parse_stmt(true)?;
            root.children.push(stmt);
        }
        Some(root)
    }

    fn kind(&self) -> TokenKind {
        self.lexer.at().kind
    }

    fn current(&self) -> Token {
        self.lexer.at().clone()
    }

    fn bump(&mut self) {
        self.lexer.advance();
    }

    fn error_at(&mut self, token: &Token, message: String) {
        let pos = token.pos;
        let hint = render_hint(&self.lexer.input().line_at(pos.line_start), pos.col);
        self.errors.push(
            EngineError::new(ErrorKind::Parse, message)
                .with_loc(SourceLoc {
                    file: self.lexer.input().name().to_owned(),
                    line: pos.line,
                    col: pos.col,
                })
                .with_hint(hint),
        );
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Option<Token> {
        if self.kind() == kind {
            let token = self.current();
            self.bump();
            Some(token)
        } else {
            let token = self.current();
            self.error_at(&token, format!("expected {what}, found {}", token.kind));
            None
        }
    }

    /// Consumes a statement terminator. Semicolons are always accepted and
    /// only demanded when the engine was configured to require them.
    fn end_stmt(&mut self) -> Option<()> {
        if self.kind() == TokenKind::Semicolon {
            self.bump();
            Some(())
        } else if self.require_semicolons {
            let token = self.current();
            self.error_at(&token, "expected ';'".to_owned());
            None
        } else {
            Some(())
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_stmt(&mut self, file_scope: bool) -> Option<Node> {
        match self.kind() {
            TokenKind::Var => self.parse_var(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Func => {
                if file_scope {
                    self.parse_func()
                } else {
                    let token = self.current();
                    self.error_at(&token, "functions may only be defined at file scope".to_owned());
                    None
                }
            }
            TokenKind::Return => self.parse_return(),
            TokenKind::Break => {
                let token = self.current();
                self.bump();
                self.end_stmt()?;
                Some(Node::new(NodeKind::Break, token))
            }
            TokenKind::Continue => {
                let token = self.current();
                self.bump();
                self.end_stmt()?;
                Some(Node::new(NodeKind::Continue, token))
            }
            TokenKind::Import => self.parse_import(),
            _ => self.parse_stmt_expr(),
        }
    }

    fn parse_var(&mut self) -> Option<Node> {
        self.bump();
        let name = self.expect(TokenKind::Name, "variable name")?;
        let mut children = Vec::new();
        if self.kind() == TokenKind::Assign {
            self.bump();
            children.push(self.parse_expr()?);
        }
        self.end_stmt()?;
        Some(Node::with_children(NodeKind::DefineVar, name, children))
    }

    fn parse_block(&mut self) -> Option<Node> {
        if self.kind() == TokenKind::LBrace {
            let brace = self.current();
            self.bump();
            let mut block = Node::new(NodeKind::Block, brace);
            while self.kind() != TokenKind::RBrace {
                if self.kind() == TokenKind::End {
                    let token = self.current();
                    self.error_at(&token, "expected '}'".to_owned());
                    return None;
                }
                if self.kind() == TokenKind::Semicolon {
                    self.bump();
                    continue;
                }
                block.children.push(self.parse_stmt(false)?);
            }
            self.bump();
            Some(block)
        } else if self.allow_unbraced_blocks {
            let token = self.current();
            let stmt = self.parse_stmt(false)?;
            Some(Node::with_children(NodeKind::Block, token, vec![stmt]))
        } else {
            let token = self.current();
            self.error_at(&token, "expected '{'".to_owned());
            None
        }
    }

    fn parse_if(&mut self) -> Option<Node> {
        let if_token = self.current();
        self.bump();
        let cond = self.parse_expr()?;
        let then_block = self.parse_block()?;

        if self.kind() == TokenKind::Else {
            self.bump();
            // `else if` desugars to `else { if ... }`
            let else_block = if self.kind() == TokenKind::If {
                let else_token = self.current();
                let nested = self.parse_if()?;
                Node::with_children(NodeKind::Block, else_token, vec![nested])
            } else {
                self.parse_block()?
            };
            Some(Node::with_children(
                NodeKind::IfElse,
                if_token,
                vec![cond, then_block, else_block],
            ))
        } else {
            Some(Node::with_children(NodeKind::If, if_token, vec![cond, then_block]))
        }
    }

    fn parse_while(&mut self) -> Option<Node> {
        let while_token = self.current();
        self.bump();
        let cond = self.parse_expr()?;
        let body = self.parse_block()?;
        Some(Node::with_children(NodeKind::While, while_token, vec![cond, body]))
    }

    fn parse_for(&mut self) -> Option<Node> {
        let for_token = self.current();
        self.bump();
        let name = self.expect(TokenKind::Name, "loop variable name")?;
        let var = Node::new(NodeKind::Variable, name);
        self.expect(TokenKind::In, "'in'")?;

        let mut iterable = self.parse_expr()?;
        if self.kind() == TokenKind::Colon {
            let colon = self.current();
            self.bump();
            let to = self.parse_expr()?;
            iterable = Node::with_children(NodeKind::Range, colon, vec![iterable, to]);
        }

        let body = self.parse_block()?;
        Some(Node::with_children(NodeKind::For, for_token, vec![var, iterable, body]))
    }

    fn parse_func(&mut self) -> Option<Node> {
        self.bump();
        let name = self.expect(TokenKind::Name, "function name")?;
        let lparen = self.expect(TokenKind::LParen, "'('")?;

        let mut params = Node::new(NodeKind::ParamList, lparen);
        if self.kind() != TokenKind::RParen {
            loop {
                let param = self.expect(TokenKind::Name, "parameter name")?;
                params.children.push(Node::new(NodeKind::Param, param));
                if self.kind() == TokenKind::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;

        let body = self.parse_block()?;
        Some(Node::with_children(NodeKind::DefineFunc, name, vec![params, body]))
    }

    fn parse_return(&mut self) -> Option<Node> {
        let ret_token = self.current();
        self.bump();
        let mut children = Vec::new();
        if self.kind() != TokenKind::Semicolon && self.kind() != TokenKind::RBrace && self.kind() != TokenKind::End {
            children.push(self.parse_expr()?);
        }
        self.end_stmt()?;
        Some(Node::with_children(NodeKind::Return, ret_token, children))
    }

    fn parse_import(&mut self) -> Option<Node> {
        self.bump();
        let node = match self.kind() {
            TokenKind::String => {
                let token = self.current();
                self.bump();
                Node::new(NodeKind::ImportScript, token)
            }
            TokenKind::Name => {
                let token = self.current();
                self.bump();
                Node::new(NodeKind::ImportLib, token)
            }
            _ => {
                let token = self.current();
                self.error_at(&token, "expected library name or script path after 'import'".to_owned());
                return None;
            }
        };
        self.end_stmt()?;
        Some(node)
    }

    fn parse_stmt_expr(&mut self) -> Option<Node> {
        let expr = self.parse_expr()?;
        self.end_stmt()?;
        let token = expr.token.clone();
        let discard = !expr.is_assignment();
        let mut children = vec![expr];
        if discard {
            // unused result gets popped
            children.push(Node::new(NodeKind::Discard, token.clone()));
        }
        Some(Node::with_children(NodeKind::StmtExpr, token, children))
    }

    // ------------------------------------------------------------------
    // Expressions (Shunting-Yard)
    // ------------------------------------------------------------------

    fn parse_expr(&mut self) -> Option<Node> {
        let mut ops: Vec<OpEntry> = Vec::new();
        let mut operands: Vec<Node> = Vec::new();
        let mut expect_operand = true;

        loop {
            let kind = self.kind();
            if expect_operand {
                // prefix operators
                if kind == TokenKind::Not || kind == TokenKind::Sub {
                    ops.push(OpEntry {
                        token: self.current(),
                        unary: true,
                    });
                    self.bump();
                    continue;
                }
                operands.push(self.parse_value()?);
                expect_operand = false;
            } else if kind.is_operator() && kind != TokenKind::Not {
                // left-associative: reduce anything of equal or higher precedence
                while ops.last().is_some_and(|top| top.prec() >= kind.prec()) {
                    self.reduce(&mut ops, &mut operands)?;
                }
                ops.push(OpEntry {
                    token: self.current(),
                    unary: false,
                });
                self.bump();
                expect_operand = true;
            } else {
                break;
            }
        }

        while !ops.is_empty() {
            self.reduce(&mut ops, &mut operands)?;
        }

        if operands.len() == 1 {
            operands.pop()
        } else {
            let token = self.current();
            self.error_at(&token, "malformed expression".to_owned());
            None
        }
    }

    /// Pops one operator and builds its node from the operand stack, using
    /// the arity keyed from the token kind.
    fn reduce(&mut self, ops: &mut Vec<OpEntry>, operands: &mut Vec<Node>) -> Option<()> {
        let op = ops.pop()?;
        let arity = if op.unary { 1 } else { op.token.kind.arity() };
        if arity == 1 {
            let Some(operand) = operands.pop() else {
                self.error_at(&op.token, "operator is missing its operand".to_owned());
                return None;
            };
            operands.push(Node::with_children(NodeKind::UnaryOp, op.token, vec![operand]));
        } else {
            let (Some(rhs), Some(lhs)) = (operands.pop(), operands.pop()) else {
                self.error_at(&op.token, "operator is missing an operand".to_owned());
                return None;
            };
            operands.push(Node::with_children(NodeKind::BinaryOp, op.token, vec![lhs, rhs]));
        }
        Some(())
    }

    fn parse_value(&mut self) -> Option<Node> {
        let base = match self.kind() {
            TokenKind::Int
            | TokenKind::Hex
            | TokenKind::Binary
            | TokenKind::Float
            | TokenKind::String
            | TokenKind::Char
            | TokenKind::True
            | TokenKind::False
            | TokenKind::None => {
                let token = self.current();
                self.bump();
                Node::new(NodeKind::Literal, token)
            }
            TokenKind::Name => {
                let name = self.current();
                if self.lexer.peek_next().kind == TokenKind::LParen {
                    // call through a bare name
                    self.bump();
                    let args = self.parse_args()?;
                    Node::with_children(NodeKind::CallNamed, name, args)
                } else {
                    self.bump();
                    Node::new(NodeKind::Variable, name)
                }
            }
            TokenKind::LParen => {
                self.bump();
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen, "')'")?;
                expr
            }
            TokenKind::LBracket => self.parse_array_literal()?,
            TokenKind::LBrace => self.parse_map_literal()?,
            _ => {
                let token = self.current();
                self.error_at(&token, format!("expected a value, found {}", token.kind));
                return None;
            }
        };
        self.parse_postfix(base)
    }

    /// Postfix chains: calls, element indexing, field access.
    fn parse_postfix(&mut self, mut base: Node) -> Option<Node> {
        loop {
            match self.kind() {
                TokenKind::LParen => {
                    // the callee was computed; evaluate it from the stack
                    let token = base.token.clone();
                    let args = self.parse_args()?;
                    let mut children = vec![base];
                    children.extend(args);
                    base = Node::with_children(NodeKind::CallUnnamed, token, children);
                }
                TokenKind::LBracket => {
                    let bracket = self.current();
                    self.bump();
                    let index = self.parse_expr()?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    base = Node::with_children(NodeKind::Element, bracket, vec![index, base]);
                }
                TokenKind::Dot => {
                    self.bump();
                    if self.kind() == TokenKind::Name {
                        let field = self.current();
                        self.bump();
                        base = Node::with_children(NodeKind::Field, field, vec![base]);
                    } else {
                        // not a field access; hand the dot back and let the
                        // surrounding production report it
                        self.lexer.undo();
                        return Some(base);
                    }
                }
                _ => return Some(base),
            }
        }
    }

    fn parse_args(&mut self) -> Option<Vec<Node>> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if self.kind() != TokenKind::RParen {
            loop {
                args.push(self.parse_expr()?);
                if self.kind() == TokenKind::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        Some(args)
    }

    fn parse_array_literal(&mut self) -> Option<Node> {
        let bracket = self.current();
        self.bump();
        let mut node = Node::new(NodeKind::ArrayLiteral, bracket);
        if self.kind() != TokenKind::RBracket {
            loop {
                node.children.push(self.parse_expr()?);
                if self.kind() == TokenKind::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBracket, "']'")?;
        Some(node)
    }

    fn parse_map_literal(&mut self) -> Option<Node> {
        let brace = self.current();
        self.bump();
        let mut node = Node::new(NodeKind::MapLiteral, brace);
        if self.kind() != TokenKind::RBrace {
            loop {
                let key = match self.kind() {
                    TokenKind::Int
                    | TokenKind::Hex
                    | TokenKind::Binary
                    | TokenKind::Float
                    | TokenKind::String
                    | TokenKind::Char
                    | TokenKind::True
                    | TokenKind::False => {
                        let token = self.current();
                        self.bump();
                        Node::new(NodeKind::Literal, token)
                    }
                    _ => {
                        let token = self.current();
                        self.error_at(&token, "map keys must be literals".to_owned());
                        return None;
                    }
                };
                let colon = self.expect(TokenKind::Colon, "':'")?;
                let value = self.parse_expr()?;
                node.children
                    .push(Node::with_children(NodeKind::MapPair, colon, vec![key, value]));
                if self.kind() == TokenKind::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(code: &str) -> Node {
        let options = EngineOptions::default();
        let mut parser = Parser::new(Input::from_string("test.aug", code), &options);
        let root = parser.parse();
        let errors = parser.take_errors();
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        root.expect("expected a parse tree")
    }

    fn parse_err(code: &str) -> Vec<EngineError> {
        let options = EngineOptions::default();
        let mut parser = Parser::new(Input::from_string("test.aug", code), &options);
        let root = parser.parse();
        let errors = parser.take_errors();
        assert!(root.is_none(), "expected the parse to fail");
        errors
    }

    #[test]
    fn precedence_shapes_the_tree() {
        // 2 + 3 * 4 parses as 2 + (3 * 4)
        let root = parse_ok("var x = 2 + 3 * 4;");
        let define = &root.children[0];
        assert_eq!(define.kind, NodeKind::DefineVar);
        let add = &define.children[0];
        assert_eq!(add.token.kind, TokenKind::Add);
        assert_eq!(add.children[0].token.text(), "2");
        assert_eq!(add.children[1].token.kind, TokenKind::Mul);
    }

    #[test]
    fn left_associativity() {
        // 10 - 4 - 3 parses as (10 - 4) - 3
        let root = parse_ok("10 - 4 - 3;");
        let stmt = &root.children[0];
        let outer = &stmt.children[0];
        assert_eq!(outer.token.kind, TokenKind::Sub);
        assert_eq!(outer.children[0].token.kind, TokenKind::Sub);
        assert_eq!(outer.children[1].token.text(), "3");
    }

    #[test]
    fn unary_not_binds_tightest() {
        let root = parse_ok("!a and b;");
        let and = &root.children[0].children[0];
        assert_eq!(and.token.kind, TokenKind::And);
        assert_eq!(and.children[0].kind, NodeKind::UnaryOp);
    }

    #[test]
    fn else_if_desugars_to_nested_block() {
        let root = parse_ok("if a { } else if b { }");
        let if_else = &root.children[0];
        assert_eq!(if_else.kind, NodeKind::IfElse);
        let else_block = &if_else.children[2];
        assert_eq!(else_block.kind, NodeKind::Block);
        assert_eq!(else_block.children[0].kind, NodeKind::If);
    }

    #[test]
    fn for_over_range() {
        let root = parse_ok("for i in 0:10 { }");
        let for_node = &root.children[0];
        assert_eq!(for_node.kind, NodeKind::For);
        assert_eq!(for_node.children[1].kind, NodeKind::Range);
    }

    #[test]
    fn named_and_unnamed_calls() {
        let root = parse_ok("f(1, 2); (g)(3);");
        assert_eq!(root.children[0].children[0].kind, NodeKind::CallNamed);
        assert_eq!(root.children[0].children[0].children.len(), 2);
        let unnamed = &root.children[1].children[0];
        assert_eq!(unnamed.kind, NodeKind::CallUnnamed);
        assert_eq!(unnamed.children[0].kind, NodeKind::Variable);
        assert_eq!(unnamed.children[1].token.text(), "3");
    }

    #[test]
    fn element_children_are_index_then_container() {
        let root = parse_ok("a[1];");
        let element = &root.children[0].children[0];
        assert_eq!(element.kind, NodeKind::Element);
        assert_eq!(element.children[0].token.text(), "1");
        assert_eq!(element.children[1].kind, NodeKind::Variable);
    }

    #[test]
    fn assignment_statement_has_no_discard() {
        let root = parse_ok("var x; x = 1; x;");
        assert_eq!(root.children[1].children.len(), 1);
        // a bare expression statement discards its value
        assert_eq!(root.children[2].children.len(), 2);
        assert_eq!(root.children[2].children[1].kind, NodeKind::Discard);
    }

    #[test]
    fn map_literal_pairs() {
        let root = parse_ok(r#"var m = {"a": 1, 2: "b"};"#);
        let map = &root.children[0].children[0];
        assert_eq!(map.kind, NodeKind::MapLiteral);
        assert_eq!(map.children.len(), 2);
        assert_eq!(map.children[0].kind, NodeKind::MapPair);
    }

    #[test]
    fn dot_without_field_name_is_handed_back() {
        // the postfix chain rewinds the dot; the next production reports it
        let errors = parse_err("var m = {}; m.1;");
        assert!(errors.iter().any(|e| e.message.contains("expected a value")));
    }

    #[test]
    fn func_at_block_scope_is_rejected() {
        let errors = parse_err("if a { func f() { } }");
        assert!(errors.iter().any(|e| e.message.contains("file scope")));
    }

    #[test]
    fn missing_paren_reports_with_location() {
        let errors = parse_err("var x = (1 + 2;");
        assert_eq!(errors[0].kind, ErrorKind::Parse);
        assert!(errors[0].loc.is_some());
        assert!(errors[0].hint.is_some());
    }

    #[test]
    fn unbraced_single_statement_block() {
        let root = parse_ok("if a b = 1;");
        let if_node = &root.children[0];
        assert_eq!(if_node.children[1].kind, NodeKind::Block);
        assert_eq!(if_node.children[1].children.len(), 1);
    }

    #[test]
    fn required_semicolons_mode() {
        let options = EngineOptions {
            require_semicolons: true,
            ..EngineOptions::default()
        };
        let mut parser = Parser::new(Input::from_string("t", "var x = 1"), &options);
        assert!(parser.parse().is_none());
        assert!(!parser.take_errors().is_empty());
    }
}

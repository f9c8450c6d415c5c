use pretty_assertions::assert_eq;
use velo_common::{intern, SyntaxMode};
use velo_parser::{parse_source, BinaryOp, ClassKind, HookKind, NodeKind, ReflectionIndex};

#[test]
fn test_simple_arithmetic_statement() {
    let (ast, diags) = parse_source("<?php 1 + 2;", 0, SyntaxMode::Php);
    assert!(!diags.has_errors(), "{:?}", diags.messages);
    let stmts = ast.root_statements();
    assert_eq!(stmts.len(), 1);
    let NodeKind::ExprStmt { expr } = ast.kind(stmts[0]) else {
        panic!("expected expression statement");
    };
    let NodeKind::Binary { op, lhs, rhs } = ast.kind(*expr) else {
        panic!("expected binary node");
    };
    assert_eq!(*op, BinaryOp::Add);
    assert_eq!(*ast.kind(*lhs), NodeKind::IntLit(1));
    assert_eq!(*ast.kind(*rhs), NodeKind::IntLit(2));
}

#[test]
fn test_precedence_multiplication_binds_tighter() {
    let (ast, _) = parse_source("<?php 1 + 2 * 3;", 0, SyntaxMode::Php);
    let NodeKind::ExprStmt { expr } = ast.kind(ast.root_statements()[0]) else {
        panic!("expected expression statement");
    };
    let NodeKind::Binary { op: BinaryOp::Add, rhs, .. } = ast.kind(*expr) else {
        panic!("expected addition at the top");
    };
    assert!(matches!(ast.kind(*rhs), NodeKind::Binary { op: BinaryOp::Mul, .. }));
}

#[test]
fn test_assignment_is_right_associative() {
    let (ast, _) = parse_source("<?php $a = $b = 1;", 0, SyntaxMode::Php);
    let NodeKind::ExprStmt { expr } = ast.kind(ast.root_statements()[0]) else {
        panic!("expected expression statement");
    };
    let NodeKind::Assign { value, .. } = ast.kind(*expr) else {
        panic!("expected assignment");
    };
    assert!(matches!(ast.kind(*value), NodeKind::Assign { .. }));
}

#[test]
fn test_ast_mode_equivalence() {
    let (php, d1) = parse_source("<?php $x = 5; $y = 3; $x + $y;", 0, SyntaxMode::Php);
    let (go, d2) = parse_source("<?php x = 5; y = 3; x + y;", 0, SyntaxMode::Go);
    assert!(!d1.has_errors());
    assert!(!d2.has_errors());
    assert!(php.structurally_equal(&go));
}

#[test]
fn test_ast_mode_equivalence_member_access() {
    let (php, _) = parse_source("<?php $o->total; $o->sum(1);", 0, SyntaxMode::Php);
    let (go, _) = parse_source("<?php o.total; o.sum(1);", 0, SyntaxMode::Go);
    assert!(php.structurally_equal(&go));
}

#[test]
fn test_go_mode_string_plus_becomes_concat() {
    let (ast, _) = parse_source(r#"<?php "a" + "b";"#, 0, SyntaxMode::Go);
    let NodeKind::ExprStmt { expr } = ast.kind(ast.root_statements()[0]) else {
        panic!("expected expression statement");
    };
    assert!(matches!(ast.kind(*expr), NodeKind::Binary { op: BinaryOp::Concat, .. }));

    // Numeric operands keep addition.
    let (ast, _) = parse_source("<?php 1 + 2;", 0, SyntaxMode::Go);
    let NodeKind::ExprStmt { expr } = ast.kind(ast.root_statements()[0]) else {
        panic!("expected expression statement");
    };
    assert!(matches!(ast.kind(*expr), NodeKind::Binary { op: BinaryOp::Add, .. }));
}

#[test]
fn test_go_mode_mixed_plus_stays_add() {
    // Typing cannot be determined syntactically, so `+` survives to runtime.
    let (ast, _) = parse_source(r#"<?php "a" + x;"#, 0, SyntaxMode::Go);
    let NodeKind::ExprStmt { expr } = ast.kind(ast.root_statements()[0]) else {
        panic!("expected expression statement");
    };
    assert!(matches!(ast.kind(*expr), NodeKind::Binary { op: BinaryOp::Add, .. }));
}

#[test]
fn test_error_recovery_produces_parse_error_node() {
    let (ast, diags) = parse_source("<?php $x = ; $y = 2;", 0, SyntaxMode::Php);
    assert!(diags.has_errors());
    // The second statement still parses.
    let has_good_assign = ast
        .root_statements()
        .iter()
        .filter(|&&s| matches!(ast.kind(s), NodeKind::ExprStmt { .. }))
        .count();
    assert!(has_good_assign >= 1);
    let has_error_node = (0..ast.len() as u32).any(|i| matches!(ast.kind(i), NodeKind::ParseError));
    assert!(has_error_node);
}

#[test]
fn test_function_declaration_with_defaults() {
    let (ast, diags) =
        parse_source("<?php function add($a, $b = 1, ...$rest) { return $a; }", 0, SyntaxMode::Php);
    assert!(!diags.has_errors(), "{:?}", diags.messages);
    let NodeKind::FunctionDecl { name, params, .. } = ast.kind(ast.root_statements()[0]) else {
        panic!("expected function declaration");
    };
    assert_eq!(*name, intern("add"));
    let params = ast.list(*params);
    assert_eq!(params.len(), 3);
    assert!(matches!(ast.kind(params[1]), NodeKind::Param { default: Some(_), .. }));
    assert!(matches!(ast.kind(params[2]), NodeKind::Param { variadic: true, .. }));
}

#[test]
fn test_class_with_attributes_and_hooks() {
    let source = r#"<?php
#[Table("users"), Cached]
class User {
    #[Column]
    public $name = "anon" { get => $this->name; set { $this->name = $value; } }
    public function id() { return 1; }
}
"#;
    let (ast, diags) = parse_source(source, 0, SyntaxMode::Php);
    assert!(!diags.has_errors(), "{:?}", diags.messages);

    let NodeKind::ClassDecl { kind, attributes, members, .. } =
        ast.kind(ast.root_statements()[0])
    else {
        panic!("expected class declaration");
    };
    assert_eq!(*kind, ClassKind::Class);
    assert_eq!(ast.list(*attributes).len(), 2);

    let prop = ast.list(*members)[0];
    let NodeKind::PropertyDecl { hooks, attributes, .. } = ast.kind(prop) else {
        panic!("expected property declaration");
    };
    assert_eq!(ast.list(*attributes).len(), 1);
    let hooks = ast.list(*hooks);
    assert_eq!(hooks.len(), 2);
    assert!(matches!(ast.kind(hooks[0]), NodeKind::PropertyHook { kind: HookKind::Get, is_expr: true, .. }));
    assert!(matches!(ast.kind(hooks[1]), NodeKind::PropertyHook { kind: HookKind::Set, is_expr: false, .. }));
}

#[test]
fn test_try_catch_finally() {
    let source = r#"<?php
try { throw new Exception("e"); } catch (Exception $ex) { echo $ex; } finally { echo 1; }
"#;
    let (ast, diags) = parse_source(source, 0, SyntaxMode::Php);
    assert!(!diags.has_errors(), "{:?}", diags.messages);
    let NodeKind::Try { catches, finally, .. } = ast.kind(ast.root_statements()[0]) else {
        panic!("expected try statement");
    };
    assert_eq!(ast.list(*catches).len(), 1);
    assert!(finally.is_some());
}

#[test]
fn test_match_expression() {
    let source = "<?php $r = match ($x) { 1, 2 => 10, default => 0 };";
    let (ast, diags) = parse_source(source, 0, SyntaxMode::Php);
    assert!(!diags.has_errors(), "{:?}", diags.messages);
    let NodeKind::ExprStmt { expr } = ast.kind(ast.root_statements()[0]) else {
        panic!("expected expression statement");
    };
    let NodeKind::Assign { value, .. } = ast.kind(*expr) else {
        panic!("expected assignment");
    };
    let NodeKind::Match { arms, .. } = ast.kind(*value) else {
        panic!("expected match");
    };
    let arms = ast.list(*arms);
    assert_eq!(arms.len(), 2);
    let NodeKind::MatchArm { conditions, .. } = ast.kind(arms[0]) else {
        panic!("expected match arm");
    };
    assert_eq!(ast.list(*conditions).len(), 2);
    let NodeKind::MatchArm { conditions, .. } = ast.kind(arms[1]) else {
        panic!("expected match arm");
    };
    assert!(conditions.is_empty());
}

#[test]
fn test_foreach_with_key() {
    let (ast, diags) =
        parse_source("<?php foreach ($items as $k => $v) { echo $v; }", 0, SyntaxMode::Php);
    assert!(!diags.has_errors());
    let NodeKind::Foreach { key_var, .. } = ast.kind(ast.root_statements()[0]) else {
        panic!("expected foreach");
    };
    assert!(key_var.is_some());
}

#[test]
fn test_go_statement_records_spawn_intent() {
    let (ast, diags) = parse_source("<?php go work(1);", 0, SyntaxMode::Php);
    assert!(!diags.has_errors(), "{:?}", diags.messages);
    assert!(matches!(ast.kind(ast.root_statements()[0]), NodeKind::GoStmt { .. }));
}

#[test]
fn test_pipe_operator_parses() {
    let (ast, diags) = parse_source("<?php $x |> trim;", 0, SyntaxMode::Php);
    assert!(!diags.has_errors(), "{:?}", diags.messages);
    let NodeKind::ExprStmt { expr } = ast.kind(ast.root_statements()[0]) else {
        panic!("expected expression statement");
    };
    assert!(matches!(ast.kind(*expr), NodeKind::Binary { op: BinaryOp::Pipe, .. }));
}

#[test]
fn test_reflection_index_tables() {
    let source = r#"<?php
trait Greets {
    public function greet() { return "hi"; }
}
class Base {
    public function id() { return 0; }
}
class User extends Base {
    use Greets;
    public $name = "anon";
    public function id() { return 1; }
}
"#;
    let (ast, diags) = parse_source(source, 0, SyntaxMode::Php);
    assert!(!diags.has_errors(), "{:?}", diags.messages);
    let (index, index_diags) = ReflectionIndex::build(&ast);
    assert!(!index_diags.has_errors(), "{:?}", index_diags.messages);

    let user = index.get_class(intern("User")).expect("User should be indexed");
    assert_eq!(user.parent, Some(intern("Base")));
    assert!(user.properties.contains_key(&intern("name")));
    // Trait method mixed in, own method kept.
    assert!(index.class_has_method(intern("User"), intern("greet")));
    assert!(index.class_has_method(intern("User"), intern("id")));
}

#[test]
fn test_reflection_dangling_parent_is_reported() {
    let (ast, _) = parse_source("<?php class A extends Missing {}", 0, SyntaxMode::Php);
    let (_, diags) = ReflectionIndex::build(&ast);
    assert!(diags.has_errors());
}

#[test]
fn test_method_attributes_query() {
    let source = r#"<?php
class Api {
    #[Route("/users"), Auth]
    public function users() { return 1; }
}
"#;
    let (ast, diags) = parse_source(source, 0, SyntaxMode::Php);
    assert!(!diags.has_errors(), "{:?}", diags.messages);
    let (index, _) = ReflectionIndex::build(&ast);
    let attrs = index.method_attributes(&ast, intern("Api"), intern("users"));
    assert_eq!(attrs.len(), 2);
    let routed = index.classes_with_attribute(&ast, intern("Route"));
    assert!(routed.is_empty());
}

#[test]
fn test_interpolation_parses_parts() {
    let (ast, diags) = parse_source(r#"<?php echo "sum is {$a} now";"#, 0, SyntaxMode::Php);
    assert!(!diags.has_errors(), "{:?}", diags.messages);
    let NodeKind::Echo { args } = ast.kind(ast.root_statements()[0]) else {
        panic!("expected echo");
    };
    let NodeKind::Interpolation { parts } = ast.kind(ast.list(*args)[0]) else {
        panic!("expected interpolation");
    };
    assert_eq!(ast.list(*parts).len(), 3);
}

#[test]
fn test_comparisons_do_not_chain() {
    let (_, diags) = parse_source("<?php 1 < 2 < 3;", 0, SyntaxMode::Php);
    assert!(diags.has_errors());
}

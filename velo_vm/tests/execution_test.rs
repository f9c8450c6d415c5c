//! End-to-end execution tests: source in, value and output out.

use pretty_assertions::assert_eq;
use velo_common::SyntaxMode;
use velo_vm::{Engine, EvalValue, Vm};

fn eval(source: &str) -> EvalValue {
    Engine::new().run_source(source).expect("script should run").value
}

fn eval_output(source: &str) -> String {
    Engine::new().run_source(source).expect("script should run").output
}

#[test]
fn test_integer_addition() {
    assert_eq!(eval("<?php 1 + 2"), EvalValue::Int(3));
}

#[test]
fn test_string_concatenation() {
    assert_eq!(
        eval(r#"<?php "hello" . " world""#),
        EvalValue::Str("hello world".to_string())
    );
}

#[test]
fn test_arithmetic_precedence_and_division() {
    assert_eq!(eval("<?php 2 + 3 * 4"), EvalValue::Int(14));
    // Division always produces a float.
    assert_eq!(eval("<?php 7 / 2"), EvalValue::Float(3.5));
    assert_eq!(eval("<?php 10 % 4"), EvalValue::Int(2));
}

#[test]
fn test_variables_and_compound_assignment() {
    assert_eq!(eval("<?php $x = 5; $x += 3; $x"), EvalValue::Int(8));
    assert_eq!(eval(r#"<?php $s = "a"; $s .= "b"; $s"#), EvalValue::Str("ab".to_string()));
}

#[test]
fn test_fibonacci_recursion() {
    let source = r#"<?php
function fib($n) {
    if ($n <= 1) return $n;
    return fib($n - 1) + fib($n - 2);
}
return fib(10);
"#;
    assert_eq!(eval(source), EvalValue::Int(55));
}

#[test]
fn test_go_mode_produces_same_value() {
    let php = eval("<?php $x = 5; $y = 3; $x + $y");
    let go = eval("// @syntax: go\n<?php x = 5; y = 3; x + y");
    assert_eq!(php, EvalValue::Int(8));
    assert_eq!(php, go);
}

#[test]
fn test_go_mode_member_access() {
    let php = r#"<?php
class Counter {
    public $total = 0;
    public function bump() { $this->total = $this->total + 1; return $this->total; }
}
$c = new Counter();
$c->bump();
$c->bump();
return $c->total;
"#;
    let go = r#"// @syntax: go
<?php
class Counter {
    public total = 0;
    public function bump() { this.total = this.total + 1; return this.total; }
}
c = new Counter();
c.bump();
c.bump();
return c.total;
"#;
    assert_eq!(eval(php), EvalValue::Int(2));
    assert_eq!(eval(php), eval(go));
}

#[test]
fn test_try_catch_echoes_message() {
    let source = r#"<?php
try { throw new Exception("e"); } catch (Exception $ex) { echo $ex->getMessage(); }
"#;
    assert_eq!(eval_output(source), "e");
}

#[test]
fn test_array_append_and_count() {
    assert_eq!(eval("<?php $a = [1, 2, 3]; $a[] = 4; count($a)"), EvalValue::Int(4));
}

#[test]
fn test_array_string_keys_and_unset() {
    let source = r#"<?php
$a = [];
$a["name"] = "velo";
$a[0] = 1;
$a[] = 2;
return $a["name"];
"#;
    assert_eq!(eval(source), EvalValue::Str("velo".to_string()));
}

#[test]
fn test_while_loop_sums() {
    let source = r#"<?php
$i = 0;
$sum = 0;
while ($i < 5) { $sum = $sum + $i; $i = $i + 1; }
return $sum;
"#;
    assert_eq!(eval(source), EvalValue::Int(10));
}

#[test]
fn test_for_loop_with_break_continue() {
    let source = r#"<?php
$sum = 0;
for ($i = 0; $i < 10; $i += 1) {
    if ($i == 3) { continue; }
    if ($i == 6) { break; }
    $sum += $i;
}
return $sum;
"#;
    // 0 + 1 + 2 + 4 + 5
    assert_eq!(eval(source), EvalValue::Int(12));
}

#[test]
fn test_foreach_iterates_in_order() {
    let source = r#"<?php
$parts = ["a", "b", "c"];
$joined = "";
foreach ($parts as $p) { $joined = $joined . $p; }
return $joined;
"#;
    assert_eq!(eval(source), EvalValue::Str("abc".to_string()));
}

#[test]
fn test_foreach_with_keys() {
    let source = r#"<?php
$map = ["x" => 1, "y" => 2];
$out = "";
foreach ($map as $k => $v) { $out = $out . $k . $v; }
return $out;
"#;
    assert_eq!(eval(source), EvalValue::Str("x1y2".to_string()));
}

#[test]
fn test_string_interpolation() {
    let source = r#"<?php
$name = "world";
$n = 2;
return "hello $name {$n}";
"#;
    assert_eq!(eval(source), EvalValue::Str("hello world 2".to_string()));
}

#[test]
fn test_heredoc_interpolates() {
    let source = "<?php\n$who = \"velo\";\n$t = <<<EOT\nhi $who\nEOT;\nreturn $t;";
    assert_eq!(eval(source), EvalValue::Str("hi velo\n".to_string()));
}

#[test]
fn test_match_expression() {
    let source = r#"<?php
$x = 2;
return match ($x) { 1 => "one", 2, 3 => "few", default => "many" };
"#;
    assert_eq!(eval(source), EvalValue::Str("few".to_string()));
}

#[test]
fn test_classes_properties_methods() {
    let source = r#"<?php
class Point {
    public $x = 0;
    public $y = 0;
    public function __construct($x, $y) { $this->x = $x; $this->y = $y; }
    public function manhattan() { return abs($this->x) + abs($this->y); }
}
$p = new Point(3, -4);
return $p->manhattan();
"#;
    assert_eq!(eval(source), EvalValue::Int(7));
}

#[test]
fn test_inheritance_and_overrides() {
    let source = r#"<?php
class Animal {
    public function speak() { return "..."; }
    public function greet() { return "I say " . $this->speak(); }
}
class Dog extends Animal {
    public function speak() { return "woof"; }
}
$d = new Dog();
return $d->greet();
"#;
    assert_eq!(eval(source), EvalValue::Str("I say woof".to_string()));
}

#[test]
fn test_property_hooks() {
    let source = r#"<?php
class Box {
    public $v = 0 { get => 42; }
}
$b = new Box();
return $b->v;
"#;
    assert_eq!(eval(source), EvalValue::Int(42));
}

#[test]
fn test_private_member_is_protected_from_outside() {
    let source = r#"<?php
class Vault { private $secret = 1; }
$v = new Vault();
return $v->secret;
"#;
    let error = Engine::new().run_source(source).unwrap_err();
    assert!(format!("{:#}", error).contains("non-public"));
}

#[test]
fn test_readonly_property_rejects_writes() {
    let source = r#"<?php
class Frozen { public readonly $n = 1; }
$f = new Frozen();
try { $f->n = 2; } catch (Error $e) { return "blocked"; }
return "wrote";
"#;
    assert_eq!(eval(source), EvalValue::Str("blocked".to_string()));
}

#[test]
fn test_division_by_zero_is_catchable() {
    let source = r#"<?php
try { 1 / 0; } catch (DivisionByZeroError $e) { return "caught"; }
return "missed";
"#;
    assert_eq!(eval(source), EvalValue::Str("caught".to_string()));
}

#[test]
fn test_uncaught_exception_reaches_embedder() {
    let error = Engine::new().run_source(r#"<?php throw new Exception("boom");"#).unwrap_err();
    assert!(format!("{:#}", error).contains("boom"));
}

#[test]
fn test_exception_unwinds_across_frames() {
    let source = r#"<?php
function inner() { throw new Exception("deep"); }
function outer() { inner(); }
try { outer(); } catch (Exception $e) { return $e->getMessage(); }
"#;
    assert_eq!(eval(source), EvalValue::Str("deep".to_string()));
}

#[test]
fn test_finally_runs_after_catch() {
    let source = r#"<?php
$log = "";
try { throw new Exception("x"); } catch (Exception $e) { $log = $log . "c"; } finally { $log = $log . "f"; }
return $log;
"#;
    assert_eq!(eval(source), EvalValue::Str("cf".to_string()));
}

#[test]
fn test_argument_count_error() {
    let source = r#"<?php
function needs_two($a, $b) { return $a; }
try { needs_two(1); } catch (ArgumentCountError $e) { return "few"; }
return "ok";
"#;
    assert_eq!(eval(source), EvalValue::Str("few".to_string()));
}

#[test]
fn test_parameter_defaults_fill_in() {
    let source = r#"<?php
function greet($name, $prefix = "hi ") { return $prefix . $name; }
return greet("velo");
"#;
    assert_eq!(eval(source), EvalValue::Str("hi velo".to_string()));
}

#[test]
fn test_variadic_collects_rest() {
    let source = r#"<?php
function tally(...$items) { return count($items); }
return tally(1, 2, 3, 4);
"#;
    assert_eq!(eval(source), EvalValue::Int(4));
}

#[test]
fn test_undefined_function_is_catchable() {
    let source = r#"<?php
try { nonsense(); } catch (Error $e) { return "caught"; }
"#;
    assert_eq!(eval(source), EvalValue::Str("caught".to_string()));
}

#[test]
fn test_static_method_call() {
    let source = r#"<?php
class MathUtil { public static function seven() { return 7; } }
return MathUtil::seven();
"#;
    assert_eq!(eval(source), EvalValue::Int(7));
}

#[test]
fn test_globals_and_constants() {
    let source = r#"<?php
const LIMIT = 10;
global $g;
$g = 32;
function read_g() { global $g; return $g; }
return read_g() + LIMIT;
"#;
    assert_eq!(eval(source), EvalValue::Int(42));
}

#[test]
fn test_go_statement_runs_synchronously() {
    let source = r#"<?php
function w($x) { echo "ran"; echo $x; }
go w(7);
"#;
    assert_eq!(eval_output(source), "ran7");
}

#[test]
fn test_clone_copies_state() {
    let source = r#"<?php
class Holder { public $v = 1; }
$a = new Holder();
$b = clone $a;
$b->v = 2;
return $a->v;
"#;
    assert_eq!(eval(source), EvalValue::Int(1));
}

#[test]
fn test_pipe_operator_calls_function() {
    let source = r#"<?php
function double($x) { return $x * 2; }
return 21 |> double;
"#;
    assert_eq!(eval(source), EvalValue::Int(42));
}

#[test]
fn test_loose_vs_strict_equality() {
    assert_eq!(eval(r#"<?php "1" == 1"#), EvalValue::Bool(true));
    assert_eq!(eval(r#"<?php "1" === 1"#), EvalValue::Bool(false));
    assert_eq!(eval("<?php null == false"), EvalValue::Bool(true));
    assert_eq!(eval("<?php 1 <=> 2"), EvalValue::Int(-1));
}

#[test]
fn test_short_circuit_skips_side_effects() {
    let source = r#"<?php
function boom() { throw new Exception("no"); }
return false && boom();
"#;
    assert_eq!(eval(source), EvalValue::Bool(false));
}

#[test]
fn test_echo_multiple_values() {
    assert_eq!(eval_output("<?php echo 1, \" and \", 2;"), "1 and 2");
}

#[test]
fn test_inline_caches_warm_up() {
    let source = r#"<?php
class C { public $n = 0; public function id() { return 1; } }
$c = new C();
$total = 0;
for ($i = 0; $i < 5; $i += 1) { $total = $total + $c->id(); }
return $total;
"#;
    let engine = Engine::new();
    let (program, _) = engine.compile(source).unwrap();
    let entry = program.entry;
    let mut vm = Vm::new(program);
    let value = vm.run().unwrap();
    assert_eq!(vm.heap.to_int(value), 5);

    // One method site inside the loop: one miss to populate, hits after.
    let slots = vm.cache_slots_for(entry);
    let (hits, misses): (u64, u64) =
        slots.iter().fold((0, 0), |(h, m), s| (h + s.hits, m + s.misses));
    assert_eq!(misses, 1);
    assert!(hits >= 4);
}

#[test]
fn test_type_feedback_records_operand_shapes() {
    let source = r#"<?php
function add($a, $b) { return $a + $b; }
add(1, 2);
add(1.5, 2.5);
return 0;
"#;
    let engine = Engine::new();
    let (program, _) = engine.compile(source).unwrap();
    let (add_index, _) = program.function_named(velo_common::intern("add")).unwrap();
    let mut vm = Vm::new(program);
    vm.run().unwrap();
    let feedback = vm.feedback_for(add_index);
    assert_eq!(feedback.len(), 1);
    // Both int and float operands seen at the one generic site.
    assert_eq!(feedback[0], 0b11);
}

#[test]
fn test_vm_determinism_across_runs() {
    let source = r#"<?php
$a = [3 => "c", 1 => "a"];
$a[] = "z";
$out = "";
foreach ($a as $k => $v) { $out = $out . $k . $v; }
return $out;
"#;
    let first = eval(source);
    let second = eval(source);
    assert_eq!(first, second);
    assert_eq!(first, EvalValue::Str("3c1a4z".to_string()));
}

#[test]
fn test_reflection_builtins() {
    let source = r#"<?php
class Tagged {
    #[Cached]
    public function load() { return 1; }
}
$t = new Tagged();
return get_class($t) . ":" . count(method_attributes("Tagged", "load"));
"#;
    assert_eq!(eval(source), EvalValue::Str("Tagged:1".to_string()));
}

#[test]
fn test_syntax_mode_affects_error_messages() {
    let go_error = Engine::new()
        .with_syntax(SyntaxMode::Go)
        .run_source("// @syntax: go\n<?php v = new Vault();")
        .unwrap_err();
    let text = format!("{:#}", go_error);
    assert!(text.contains("Vault"), "{}", text);
    // No raw `->` leaks into go-mode messages.
    assert!(!text.contains("->"), "{}", text);
}

//! End-to-end script tests: compile, lower and run whole programs through
//! the public API with captured output.

use std::{cell::RefCell, rc::Rc};

use pretty_assertions::assert_eq;
use udon::{CollectPrint, Interpreter, UdonError, Value};

fn interpreter_with_capture() -> (Interpreter, Rc<RefCell<String>>) {
    let mut interp = Interpreter::new();
    let writer = CollectPrint::new();
    let handle = writer.handle();
    interp.set_print(Rc::new(RefCell::new(writer)));
    (interp, handle)
}

fn run_script(source: &str) -> (Result<Value, UdonError>, String) {
    let (mut interp, handle) = interpreter_with_capture();
    let result = interp.compile(source).and_then(|()| interp.run("main", vec![]));
    let output = handle.borrow().clone();
    (result, output)
}

/// Runs `main` and returns captured stdout with trailing whitespace
/// trimmed, panicking on any error.
fn run_stdout(source: &str) -> String {
    let (result, output) = run_script(source);
    result.expect("script should run");
    output.trim_end().to_owned()
}

fn run_value(source: &str) -> Value {
    let (result, _) = run_script(source);
    result.expect("script should run")
}

// ----- the six reference scenarios ---------------------------------------

#[test]
fn test_scenario_hello_concat() {
    let out = run_stdout(r#"function main() { print("Hello, " .. "World!") }"#);
    assert_eq!(out, "Hello, World!");
}

#[test]
fn test_scenario_recursive_factorial() {
    let out = run_stdout(
        "function fact(n) { if (n < 2) return 1; return n * fact(n-1) }\n\
         function main() { print(fact(10)) }",
    );
    assert_eq!(out, "3628800");
}

#[test]
fn test_scenario_foreach_sum() {
    let out = run_stdout(
        "function main() {\n\
           var o = {a: 1, b: 2, c: 3}\n\
           var sum = 0\n\
           foreach (var k, v in o) sum += v\n\
           print(sum)\n\
         }",
    );
    assert_eq!(out, "6");
}

#[test]
fn test_scenario_closure_counter() {
    let out = run_stdout(
        "function make_counter() {\n\
           var n = 0\n\
           return function() { n = n + 1; return n }\n\
         }\n\
         function main() {\n\
           var c = make_counter()\n\
           print(c()); print(c()); print(c())\n\
         }",
    );
    assert_eq!(out, "1\n2\n3");
}

#[test]
fn test_scenario_destructuring() {
    let out = run_stdout(
        "function main() {\n\
           var a = [10, 20, 30]\n\
           var x, y, z = a\n\
           print(x + y + z)\n\
         }",
    );
    assert_eq!(out, "60");
}

#[test]
fn test_scenario_to_json() {
    let out = run_stdout(r#"function main() { print(to_json({name: "x", values: [1,2,3]})) }"#);
    assert_eq!(out, r#"{"name":"x","values":{"0":1,"1":2,"2":3}}"#);
}

// ----- P1: numeric closure -----------------------------------------------

#[test]
fn test_int_ops_stay_int() {
    assert_eq!(run_value("function main() { return typeof(3 + 4) }"), Value::str("Int"));
    assert_eq!(run_value("function main() { return 7 / 2 }"), Value::Int(3));
    assert_eq!(run_value("function main() { return 7 % 4 }"), Value::Int(3));
    assert_eq!(run_value("function main() { return -7 / 2 }"), Value::Int(-3));
}

#[test]
fn test_float_operand_promotes() {
    assert_eq!(run_value("function main() { return typeof(3 + 4.0) }"), Value::str("Float"));
    assert_eq!(run_value("function main() { return 7.0 / 2 }"), Value::Float(3.5));
    assert_eq!(run_value("function main() { return 7.5 % 2 }"), Value::Float(1.5));
}

// ----- P2: array identity ------------------------------------------------

#[test]
fn test_array_handles_share_storage() {
    let value = run_value(
        "function main() {\n\
           var a = [1, 2]\n\
           var b = a\n\
           b[0] = 9\n\
           return a[0] == 9\n\
         }",
    );
    assert_eq!(value, Value::Bool(true));
}

#[test]
fn test_array_identity_equality() {
    assert_eq!(
        run_value("function main() { var a = [1] var b = a return a == b }"),
        Value::Bool(true)
    );
    assert_eq!(
        run_value("function main() { var a = [1] var b = [1] return a == b }"),
        Value::Bool(false)
    );
}

#[test]
fn test_parameter_passing_copies_handle() {
    let value = run_value(
        "function poke(arr) { arr:x = 1 }\n\
         function main() { var a = [] poke(a) return a:x }",
    );
    assert_eq!(value, Value::Int(1));
}

// ----- P3: insertion order -----------------------------------------------

#[test]
fn test_keys_enumerate_in_insertion_order() {
    let out = run_stdout(
        "function main() {\n\
           var o = {zeta: 1, alpha: 2, mid: 3}\n\
           o:extra = 4\n\
           print(join(keys(o), \",\"))\n\
         }",
    );
    assert_eq!(out, "zeta,alpha,mid,extra");
}

#[test]
fn test_foreach_observes_same_order() {
    let out = run_stdout(
        "function main() {\n\
           var o = {b: 10, a: 20, c: 30}\n\
           foreach (var k, v in o) { print(k .. \"=\" .. v) }\n\
         }",
    );
    assert_eq!(out, "b=10\na=20\nc=30");
}

#[test]
fn test_delete_preserves_remaining_order() {
    let out = run_stdout(
        "function main() {\n\
           var o = {a: 1, b: 2, c: 3}\n\
           delete(o, \"b\")\n\
           print(join(keys(o), \",\"))\n\
         }",
    );
    assert_eq!(out, "a,c");
}

#[test]
fn test_integral_float_key_collapses() {
    let value = run_value("function main() { var o = [] o[1.0] = \"f\" return o[1] }");
    assert_eq!(value, Value::str("f"));
}

// ----- P4: scope isolation -----------------------------------------------

#[test]
fn test_block_local_not_visible_after_block() {
    let (mut interp, _) = interpreter_with_capture();
    let err = interp
        .compile("function main() { if (true) { var x = 1 } return x }")
        .unwrap_err();
    assert!(err.message.contains("Undeclared variable 'x'"));
}

#[test]
fn test_loop_induction_variable_is_loop_local() {
    let (mut interp, _) = interpreter_with_capture();
    let err = interp
        .compile("function main() { for (var i = 0; i < 3; i += 1) { } return i }")
        .unwrap_err();
    assert!(err.message.contains("Undeclared variable 'i'"));
}

#[test]
fn test_inner_scope_shadows_outer() {
    let value = run_value(
        "function main() {\n\
           var x = 1\n\
           if (true) { var x = 2 x = x + 1 }\n\
           return x\n\
         }",
    );
    assert_eq!(value, Value::Int(1));
}

// ----- P5: short-circuit -------------------------------------------------

#[test]
fn test_and_short_circuits() {
    let out = run_stdout(
        "var called = false\n\
         function mark() { called = true return true }\n\
         function main() {\n\
           var r = false && mark()\n\
           print(called)\n\
           print(r)\n\
         }",
    );
    assert_eq!(out, "false\nfalse");
}

#[test]
fn test_or_short_circuits() {
    let out = run_stdout(
        "var called = false\n\
         function mark() { called = true return false }\n\
         function main() {\n\
           var r = true || mark()\n\
           print(called)\n\
           print(r)\n\
         }",
    );
    assert_eq!(out, "false\ntrue");
}

#[test]
fn test_logical_result_is_boolean() {
    assert_eq!(run_value("function main() { return typeof(1 && 2) }"), Value::str("Bool"));
    assert_eq!(run_value("function main() { return 1 && 2 }"), Value::Bool(true));
}

// ----- P6: closure capture -----------------------------------------------

#[test]
fn test_two_closures_share_one_activation() {
    let out = run_stdout(
        "function make_pair() {\n\
           var n = 0\n\
           var bump = function() { n = n + 1 return n }\n\
           var read = function() { return n }\n\
           return [bump, read]\n\
         }\n\
         function main() {\n\
           var fns = make_pair()\n\
           var bump, read = fns\n\
           bump()\n\
           bump()\n\
           print(read())\n\
         }",
    );
    assert_eq!(out, "2");
}

#[test]
fn test_closure_writes_visible_in_enclosing_frame() {
    // The inner write lands while the outer activation is still live.
    let value = run_value(
        "function outer() {\n\
           var n = 1\n\
           var set = function() { n = 42 }\n\
           set()\n\
           return n\n\
         }\n\
         function main() { return outer() }",
    );
    assert_eq!(value, Value::Int(42));
}

#[test]
fn test_capture_survives_gc() {
    let value = run_value(
        "function make_counter() {\n\
           var n = 0\n\
           return function() { n = n + 1 return n }\n\
         }\n\
         function main() {\n\
           var c = make_counter()\n\
           c()\n\
           __gc_collect()\n\
           c()\n\
           __gc_collect()\n\
           return c()\n\
         }",
    );
    assert_eq!(value, Value::Int(3));
}

// ----- P7: GC soundness --------------------------------------------------

#[test]
fn test_gc_keeps_reachable_frees_garbage() {
    let out = run_stdout(
        "var keep = {a: {b: [1, 2, 3]}}\n\
         function churn() {\n\
           for (var i = 0; i < 100; i += 1) { var tmp = [i, [i]] }\n\
           return 0\n\
         }\n\
         function main() {\n\
           churn()\n\
           __gc_collect()\n\
           var before = __gc_stats()\n\
           __gc_collect()\n\
           var after = __gc_stats()\n\
           print(after:arrays == before:arrays + 1)\n\
           print(keep:a:b[2])\n\
         }",
    );
    // The only allocation between the two collections is the first stats
    // array itself, which stays live in a local.
    assert_eq!(out, "true\n3");
}

#[test]
fn test_gc_host_level_sweep() {
    let mut interp = Interpreter::new();
    interp.compile("function garbage() { var a = [1,2,3] return 0 }").unwrap();
    for _ in 0..10 {
        interp.run("garbage", vec![]).unwrap();
    }
    interp.collect_garbage(None);
    let runs_before = interp.gc_stats().runs;
    interp.collect_garbage(None);
    assert_eq!(interp.gc_stats().runs, runs_before + 1);
}

#[test]
fn test_gc_budget_accepted() {
    let (result, _) = run_script("function main() { __gc_collect(5) return 1 }");
    assert_eq!(result.unwrap(), Value::Int(1));
}

// ----- P8: determinism ---------------------------------------------------

#[test]
fn test_repeated_runs_produce_identical_output() {
    let source = "function main() {\n\
                    var o = {x: 1, y: 2}\n\
                    o:z = 3\n\
                    foreach (var k, v in o) { print(k .. v) }\n\
                    print(to_json(o))\n\
                  }";
    let first = run_stdout(source);
    let second = run_stdout(source);
    assert_eq!(first, second);
    assert_eq!(first, "x1\ny2\nz3\n{\"x\":1,\"y\":2,\"z\":3}");
}

// ----- P9: event order ---------------------------------------------------

#[test]
fn test_event_handlers_fire_in_registration_order() {
    let (mut interp, handle) = interpreter_with_capture();
    interp
        .compile(
            "function on:tick() { print(\"first\") }\n\
             function on:tick() { print(\"second\") }\n\
             function on:tick() { print(\"third\") }",
        )
        .unwrap();
    interp.run_eventhandlers("on:tick").unwrap();
    assert_eq!(handle.borrow().trim_end(), "first\nsecond\nthird");
}

#[test]
fn test_event_dispatch_from_script() {
    let out = run_stdout(
        "function on:boom() { print(\"boom\") }\n\
         function main() { run_eventhandlers(\"on:boom\") }",
    );
    assert_eq!(out, "boom");
}

#[test]
fn test_event_dispatch_stops_on_first_error() {
    let (mut interp, handle) = interpreter_with_capture();
    interp
        .compile(
            "function on:e() { print(\"a\") }\n\
             function on:e() { missing() }\n\
             function on:e() { print(\"never\") }",
        )
        .unwrap();
    assert!(interp.run_eventhandlers("on:e").is_err());
    assert_eq!(handle.borrow().trim_end(), "a");
}

// ----- P10: import hygiene ----------------------------------------------

#[test]
fn test_import_snapshots_and_forwards() {
    let dir = tempfile::tempdir().unwrap();
    let module_path = dir.path().join("mod.udon");
    std::fs::write(
        &module_path,
        "var counter = 10\n\
         function bump() { counter = counter + 1 return counter }\n\
         function get() { return counter }",
    )
    .unwrap();

    let source = format!(
        "function main() {{\n\
           var m = import(\"{}\")\n\
           print(m:counter)\n\
           var bump = m:bump\n\
           print(bump())\n\
           print(bump())\n\
           print(m:counter)\n\
         }}",
        module_path.display()
    );
    let out = run_stdout(&source);
    // The snapshot stays at import-time state while the child advances.
    assert_eq!(out, "10\n11\n12\n10");
}

#[test]
fn test_import_isolation_both_ways() {
    let dir = tempfile::tempdir().unwrap();
    let module_path = dir.path().join("iso.udon");
    std::fs::write(
        &module_path,
        "var data = {n: 1}\n\
         function read_n() { return data:n }",
    )
    .unwrap();

    let source = format!(
        "function main() {{\n\
           var m = import(\"{}\")\n\
           m:data:n = 99\n\
           var read = m:read_n\n\
           return read()\n\
         }}",
        module_path.display()
    );
    // Mutating the snapshot copy does not touch the child interpreter.
    assert_eq!(run_value(&source), Value::Int(1));
}

// ----- named and variadic arguments --------------------------------------

#[test]
fn test_named_arguments_route_by_name() {
    let value = run_value(
        "function greet(name, punct) { return name .. punct }\n\
         function main() { return greet(punct=\"!\", name=\"hi\") }",
    );
    assert_eq!(value, Value::str("hi!"));
}

#[test]
fn test_named_and_positional_mix() {
    let value = run_value(
        "function f(a, b, c) { return a .. b .. c }\n\
         function main() { return f(\"x\", c=\"z\", b=\"y\") }",
    );
    assert_eq!(value, Value::str("xyz"));
}

#[test]
fn test_unknown_named_argument_errors() {
    let (result, _) = run_script(
        "function f(a) { return a }\n\
         function main() { return f(1, nope=2) }",
    );
    let err = result.unwrap_err();
    assert!(err.message.contains("Unknown named argument 'nope'"));
}

#[test]
fn test_variadic_collects_rest() {
    let value = run_value(
        "function f(first, rest...) { return first + len(rest) }\n\
         function main() { return f(10, 1, 2, 3) }",
    );
    assert_eq!(value, Value::Int(13));
}

#[test]
fn test_variadic_accepts_unknown_named() {
    let value = run_value(
        "function f(rest...) { return rest:tag }\n\
         function main() { return f(tag=\"ok\") }",
    );
    assert_eq!(value, Value::str("ok"));
}

#[test]
fn test_too_many_positionals_error() {
    let (result, _) = run_script(
        "function f(a) { return a }\n\
         function main() { return f(1, 2) }",
    );
    assert!(result.unwrap_err().message.contains("Too many positional arguments"));
}

#[test]
fn test_missing_arguments_bind_none() {
    let value = run_value(
        "function f(a, b) { return typeof(b) }\n\
         function main() { return f(1) }",
    );
    assert_eq!(value, Value::str("None"));
}

// ----- control flow ------------------------------------------------------

#[test]
fn test_while_with_break_and_continue() {
    let out = run_stdout(
        "function main() {\n\
           var i = 0\n\
           var sum = 0\n\
           while (true) {\n\
             i += 1\n\
             if (i > 10) break\n\
             if (i % 2 == 0) continue\n\
             sum += i\n\
           }\n\
           print(sum)\n\
         }",
    );
    assert_eq!(out, "25");
}

#[test]
fn test_for_loop_with_step_expression() {
    let out = run_stdout(
        "function main() {\n\
           var sum = 0\n\
           for (var i = 0; i < 5; i += 1) { sum += i }\n\
           print(sum)\n\
         }",
    );
    assert_eq!(out, "10");
}

#[test]
fn test_switch_matches_and_breaks() {
    let out = run_stdout(
        "function pick(x) {\n\
           switch (x) {\n\
             case 1: return \"one\"\n\
             case \"two\": return \"2\"\n\
             default: return \"other\"\n\
           }\n\
         }\n\
         function main() { print(pick(1)) print(pick(\"two\")) print(pick(99)) }",
    );
    assert_eq!(out, "one\n2\nother");
}

#[test]
fn test_break_inside_switch() {
    let out = run_stdout(
        "function main() {\n\
           var r = \"\"\n\
           switch (2) {\n\
             case 2:\n\
               r = \"hit\"\n\
               break\n\
             default:\n\
               r = \"default\"\n\
           }\n\
           print(r)\n\
         }",
    );
    assert_eq!(out, "hit");
}

#[test]
fn test_ternary_and_increment() {
    assert_eq!(run_value("function main() { return 1 < 2 ? 10 : 20 }"), Value::Int(10));
    assert_eq!(
        run_value("function main() { var x = 5 ++x return x++ }"),
        Value::Int(7)
    );
}

#[test]
fn test_foreach_over_string_is_positional() {
    let out = run_stdout(
        "function main() {\n\
           var s = \"abc\"\n\
           foreach (var i in s) { puts(s[i]) }\n\
           print(\"\")\n\
         }",
    );
    assert_eq!(out, "abc");
}

#[test]
fn test_nested_loops_break_inner_only() {
    let out = run_stdout(
        "function main() {\n\
           var hits = 0\n\
           for (var i = 0; i < 3; i += 1) {\n\
             for (var j = 0; j < 3; j += 1) {\n\
               if (j == 1) break\n\
               hits += 1\n\
             }\n\
           }\n\
           print(hits)\n\
         }",
    );
    assert_eq!(out, "3");
}

// ----- values and operators ----------------------------------------------

#[test]
fn test_concat_operator_stringifies() {
    assert_eq!(run_value("function main() { return 1 .. \"x\" .. 2.5 }"), Value::str("1x2.5"));
}

#[test]
fn test_plus_with_string_concatenates() {
    assert_eq!(run_value("function main() { return \"v\" + 1 }"), Value::str("v1"));
}

#[test]
fn test_plus_merges_arrays() {
    let out = run_stdout(
        "function main() {\n\
           var merged = {a: 1} + {b: 2, a: 9}\n\
           print(to_json(merged))\n\
         }",
    );
    assert_eq!(out, r#"{"a":9,"b":2}"#);
}

#[test]
fn test_division_by_zero_errors() {
    let (result, _) = run_script("function main() { return 1 / 0 }");
    let err = result.unwrap_err();
    assert!(err.message.contains("Division by zero"));
    assert!(err.has_location());
}

#[test]
fn test_arithmetic_type_mismatch_errors() {
    let (result, _) = run_script("function main() { return none - 1 }");
    assert!(result.unwrap_err().message.contains("Invalid operands"));
}

#[test]
fn test_missing_property_reads_none() {
    assert_eq!(
        run_value("function main() { var o = {} return typeof(o:missing) }"),
        Value::str("None")
    );
}

#[test]
fn test_calling_missing_function_errors() {
    let (result, _) = run_script("function main() { return nope(1) }");
    assert!(result.unwrap_err().message.contains("Function 'nope' not found"));
}

#[test]
fn test_calling_non_function_errors() {
    let (result, _) = run_script("function main() { var x = 5 return x() }");
    assert!(result.unwrap_err().message.contains("Cannot call non-function"));
}

#[test]
fn test_multi_value_return_packs_array() {
    let out = run_stdout(
        "function pair() { return (1, 2) }\n\
         function main() { var a, b = pair() print(a + b) }",
    );
    assert_eq!(out, "3");
}

#[test]
fn test_compound_index_assignment() {
    let value = run_value("function main() { var a = [5] a[0] += 2 return a[0] }");
    assert_eq!(value, Value::Int(7));
}

#[test]
fn test_chained_property_store() {
    let value = run_value(
        "function main() {\n\
           var o = {inner: {}}\n\
           o:inner:x = 3\n\
           o:inner:x += 1\n\
           return o:inner:x\n\
         }",
    );
    assert_eq!(value, Value::Int(4));
}

#[test]
fn test_store_through_shared_handle_in_function() {
    let out = run_stdout(
        "function set(o) { o[\"k\"] = \"v\" }\n\
         function main() { var o = [] set(o) print(o:k) }",
    );
    assert_eq!(out, "v");
}

// ----- byte-wise strings -------------------------------------------------

#[test]
fn test_non_ascii_string_length_counts_bytes() {
    // "é" is two bytes of UTF-8
    assert_eq!(run_value("function main() { return len(\"café\") }"), Value::Int(5));
}

#[test]
fn test_indexing_recovers_utf8_bytes() {
    // "é" encodes as 0xC3 0xA9; ord of each indexed position recovers the
    // raw byte value at that offset.
    let out = run_stdout(
        "function main() {\n\
           var s = \"café\"\n\
           print(ord(s[0]))\n\
           print(ord(s[3]))\n\
           print(ord(s[4]))\n\
         }",
    );
    assert_eq!(out, "99\n195\n169");
}

#[test]
fn test_chr_ord_round_trip_all_bytes() {
    let value = run_value(
        "function main() {\n\
           for (var n = 0; n < 256; n += 1) {\n\
             if (ord(chr(n)) != n) return n\n\
           }\n\
           return -1\n\
         }",
    );
    assert_eq!(value, Value::Int(-1));
}

#[test]
fn test_chr_wraps_into_byte_range() {
    assert_eq!(run_value("function main() { return chr(65) }"), Value::str("A"));
    assert_eq!(
        run_value("function main() { return chr(321) == chr(65) }"),
        Value::Bool(true)
    );
    assert_eq!(run_value("function main() { return ord(chr(-1)) }"), Value::Int(255));
}

#[test]
fn test_ord_of_empty_string_is_zero() {
    assert_eq!(run_value("function main() { return ord(\"\") }"), Value::Int(0));
}

#[test]
fn test_chr_reproduces_indexed_positions() {
    let value = run_value(
        "function main() {\n\
           var s = \"café\"\n\
           return chr(ord(s[3])) == s[3] && chr(233) == \"é\" && ord(\"é\") == 233\n\
         }",
    );
    assert_eq!(value, Value::Bool(true));
}

#[test]
fn test_foreach_over_non_ascii_string_visits_bytes() {
    let out = run_stdout(
        "function main() {\n\
           var s = \"aé\"\n\
           var count = 0\n\
           foreach (var i in s) { count += 1 }\n\
           print(count)\n\
         }",
    );
    assert_eq!(out, "3");
}

// ----- globals and host API ----------------------------------------------

#[test]
fn test_global_initializers_run_at_compile() {
    let (mut interp, _) = interpreter_with_capture();
    interp
        .compile("var base = 40\nvar derived = base + 2\nfunction main() { return derived }")
        .unwrap();
    assert_eq!(interp.get_global("derived"), Some(Value::Int(42)));
    assert_eq!(interp.run("main", vec![]).unwrap(), Value::Int(42));
}

#[test]
fn test_global_access_by_slot() {
    let mut interp = Interpreter::new();
    interp.compile("var first = 1\nvar second = 2\nfunction main() { return 0 }").unwrap();
    let slot = interp.global_slot("second").unwrap();
    assert_eq!(interp.global_by_slot(slot), Some(Value::Int(2)));
    assert_eq!(interp.global_names(), vec!["first", "second"]);
}

#[test]
fn test_host_set_global_visible_to_script() {
    let mut interp = Interpreter::new();
    interp.compile("var x = 0\nfunction main() { return x + 1 }").unwrap();
    interp.set_global("x", Value::Int(9));
    assert_eq!(interp.run("main", vec![]).unwrap(), Value::Int(10));
}

#[test]
fn test_host_arguments_bind_to_parameters() {
    let mut interp = Interpreter::new();
    interp.compile("function add(a, b) { return a + b }").unwrap();
    let result = interp.run("add", vec![Value::Int(20), Value::Int(22)]).unwrap();
    assert_eq!(result, Value::Int(42));
}

#[test]
fn test_host_named_arguments() {
    let mut interp = Interpreter::new();
    interp.compile("function tag(name, wrap) { return wrap .. name .. wrap }").unwrap();
    let result = interp
        .run_with_named(
            "tag",
            vec![],
            vec![("wrap".to_owned(), Value::str("*")), ("name".to_owned(), Value::str("hi"))],
        )
        .unwrap();
    assert_eq!(result, Value::str("*hi*"));
}

#[test]
fn test_host_invoke_closure() {
    let mut interp = Interpreter::new();
    interp
        .compile("function make_adder(n) { return function(x) { return x + n } }")
        .unwrap();
    let adder = interp.run("make_adder", vec![Value::Int(5)]).unwrap();
    let result = interp.invoke(&adder, vec![Value::Int(37)]).unwrap();
    assert_eq!(result, Value::Int(42));
}

#[test]
fn test_registered_builtin_and_template_token() {
    fn shout(_interp: &mut Interpreter, args: &[Value], _named: &udon::NamedArgs) -> udon::UdonResult<Value> {
        match args.first() {
            Some(Value::Str(s)) => Ok(Value::str(&s.to_uppercase())),
            _ => Err(udon::UdonError::host("$shout expects a string")),
        }
    }

    let (mut interp, handle) = interpreter_with_capture();
    interp.register_builtin("$shout", "template:string", "string", shout);
    interp
        .compile("function main() { print($shout(hello world)) }")
        .unwrap();
    interp.run("main", vec![]).unwrap();
    assert_eq!(handle.borrow().trim_end(), "HELLO WORLD");
}

#[test]
fn test_builtin_alias() {
    assert_eq!(run_value("function main() { return length(\"four\") }"), Value::Int(4));
}

#[test]
fn test_compile_append_keeps_existing_state() {
    let mut interp = Interpreter::new();
    interp.compile("var total = 1\nfunction base() { return total }").unwrap();
    interp.compile_append("function more() { return base() + 1 }").unwrap();
    assert_eq!(interp.run("more", vec![]).unwrap(), Value::Int(2));
}

// ----- builtins ----------------------------------------------------------

#[test]
fn test_builtin_sort_and_join() {
    let out = run_stdout(
        "function main() {\n\
           var sorted = sort([3, 1, 2])\n\
           print(join(sorted, \"-\"))\n\
           var desc = sort([3, 1, 2], {desc: true})\n\
           print(join(desc, \"-\"))\n\
         }",
    );
    assert_eq!(out, "1-2-3\n3-2-1");
}

#[test]
fn test_builtin_sort_with_comparator() {
    let out = run_stdout(
        "function main() {\n\
           var by_len = sort([\"ccc\", \"a\", \"bb\"], {compare: function(a, b) { return len(a) - len(b) }})\n\
           print(join(by_len, \",\"))\n\
         }",
    );
    assert_eq!(out, "a,bb,ccc");
}

#[test]
fn test_builtin_push_pop_shift() {
    let out = run_stdout(
        "function main() {\n\
           var a = [1, 2]\n\
           push(a, 3)\n\
           print(len(a))\n\
           print(pop(a))\n\
           print(shift(a))\n\
           print(a[0])\n\
         }",
    );
    assert_eq!(out, "3\n3\n1\n2");
}

#[test]
fn test_builtin_delete_missing_key_is_false() {
    assert_eq!(
        run_value("function main() { return delete([], \"ghost\") }"),
        Value::Bool(false)
    );
}

#[test]
fn test_builtin_string_suite() {
    let out = run_stdout(
        "function main() {\n\
           print(to_upper(\"ab\"))\n\
           print(substr(\"hello\", 1, 3))\n\
           print(replace(\"a-a-a\", \"-\", \"+\"))\n\
           print(find(\"hay needle\", \"needle\"))\n\
           print(join(split(\"a,b,c\", \",\"), \"|\"))\n\
           print(trim(\"  pad  \"))\n\
         }",
    );
    assert_eq!(out, "AB\nell\na+a+a\n4\na|b|c\npad");
}

#[test]
fn test_builtin_json_roundtrip() {
    let out = run_stdout(
        "function main() {\n\
           var parsed = from_json(\"{\\\"a\\\":1,\\\"b\\\":[true,null]}\")\n\
           print(parsed:a)\n\
           print(parsed:b[0])\n\
           print(typeof(parsed:b[1]))\n\
           print(to_json(parsed))\n\
         }",
    );
    assert_eq!(out, "1\ntrue\nNone\n{\"a\":1,\"b\":{\"0\":true,\"1\":null}}");
}

#[test]
fn test_builtin_encoding() {
    let out = run_stdout(
        "function main() {\n\
           print(to_base64(\"hi\"))\n\
           print(from_base64(to_base64(\"round trip\")))\n\
           print(md5(\"abc\"))\n\
           print(to_base(255, \"0123456789abcdef\"))\n\
           print(from_base(\"ff\", \"0123456789abcdef\"))\n\
         }",
    );
    assert_eq!(
        out,
        "aGk=\nround trip\n900150983cd24fb0d6963f7d28e17f72\nff\n255"
    );
}

#[test]
fn test_builtin_math_promotion() {
    let out = run_stdout(
        "function main() {\n\
           print(abs(-4))\n\
           print(sqrt(2.0))\n\
           print(pow(2, 10))\n\
           print(min(3, 1.5))\n\
         }",
    );
    assert_eq!(out, "4\n1.4142135623730951\n1024\n1.5");
}

#[test]
fn test_builtin_range() {
    let out = run_stdout("function main() { print(join(range(0, 10, 3), \",\")) }");
    assert_eq!(out, "0,3,6,9");
}

#[test]
fn test_builtin_contains() {
    let out = run_stdout(
        "function main() {\n\
           print(contains([1, 2, 3], 2))\n\
           print(contains(\"haystack\", \"stack\"))\n\
           print(contains([1], 9))\n\
         }",
    );
    assert_eq!(out, "true\ntrue\nfalse");
}

// ----- disassembly -------------------------------------------------------

#[test]
fn test_dump_instructions_format() {
    let mut interp = Interpreter::new();
    interp.compile("function add(a, b) { return a + b }").unwrap();
    let dump = interp.dump_instructions();
    assert!(dump.starts_with("function add(a, b)\n"));
    assert!(dump.contains("  [0] LOAD_LOCAL 0:0\n"));
    assert!(dump.contains("ADD"));
    assert!(dump.contains("RETURN"));
}

#[test]
fn test_dump_lowered_format() {
    let mut interp = Interpreter::new();
    interp.compile("function add(a, b) { return a + b }").unwrap();
    let dump = interp.dump_lowered();
    assert!(dump.contains("function add(frame_size="));
    assert!(dump.contains("ADD dst="));
    assert!(dump.contains("RETURN src="));
}

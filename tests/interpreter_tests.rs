// tests/interpreter_tests.rs

use std::cell::RefCell;
use std::rc::Rc;

use datascript::{Error, Interpreter, RuntimeError, Value};

/// Runs a source string and returns the result plus everything printed.
fn run(src: &str) -> (Result<Value, Error>, String) {
    let buffer = Rc::new(RefCell::new(String::new()));
    let sink = buffer.clone();
    let mut interp = Interpreter::new().with_output(move |text| sink.borrow_mut().push_str(text));
    let result = interp.run_source(src);
    let output = buffer.borrow().clone();
    (result, output)
}

fn output_of(src: &str) -> String {
    let (result, output) = run(src);
    result.expect("script should run");
    output
}

fn error_of(src: &str) -> RuntimeError {
    let (result, _) = run(src);
    match result {
        Err(Error::Runtime(e)) => e,
        Err(other) => panic!("expected a runtime error, got {:?}", other),
        Ok(v) => panic!("expected an error, got {:?}", v),
    }
}

// ============================================================================
// Arithmetic, strings, truthiness
// ============================================================================

#[test]
fn test_arithmetic_and_string_promotion() {
    let output = output_of(r#"declare x = 2 + 3 * 4; print(x); print("val=" + x);"#);
    assert_eq!(output, "14\nval=14\n");
}

#[test]
fn test_number_formatting() {
    let output = output_of("print(1.5); print(3 / 2); print(-4 + 1);");
    assert_eq!(output, "1.5\n1.5\n-3\n");
}

#[test]
fn test_division_by_zero_is_fatal() {
    assert_eq!(error_of("1 / 0;"), RuntimeError::DivisionByZero);
    assert_eq!(error_of("1 % 0;"), RuntimeError::DivisionByZero);
}

#[test]
fn test_logical_operators_return_booleans() {
    let output = output_of(
        r#"print(1 && "x"); print(0 && 1); print(0 || ""); print(null || 3); print(!0);"#,
    );
    assert_eq!(output, "true\nfalse\nfalse\ntrue\ntrue\n");
}

#[test]
fn test_equality_semantics() {
    let output = output_of(
        r#"
        print(null == null);
        print("1" == 1);
        declare a = [1];
        declare b = [1];
        print(a == b);
        print(a == a);
        print(a != b);
        "#,
    );
    assert_eq!(output, "true\nfalse\nfalse\ntrue\ntrue\n");
}

#[test]
fn test_relational_on_strings() {
    let output = output_of(r#"print("apple" < "banana"); print(2 <= 2);"#);
    assert_eq!(output, "true\ntrue\n");
}

#[test]
fn test_relational_type_mismatch_is_fatal() {
    assert!(matches!(
        error_of(r#"1 < "2";"#),
        RuntimeError::TypeError(_)
    ));
}

// ============================================================================
// Scoping, declarations, control flow
// ============================================================================

#[test]
fn test_lexical_shadowing() {
    let output = output_of(
        r#"
        declare x = 1;
        func inner() { declare x = 2; return x; }
        print(inner());
        print(x);
        "#,
    );
    assert_eq!(output, "2\n1\n");
}

#[test]
fn test_const_immutability() {
    assert!(matches!(
        error_of("declare const c = 1; c = 2;"),
        RuntimeError::ConstReassignment(_)
    ));
    // depth does not matter
    assert!(matches!(
        error_of("declare const c = 1; func f() { c = 2; return null; } f();"),
        RuntimeError::ConstReassignment(_)
    ));
}

#[test]
fn test_redeclaration_is_fatal() {
    assert!(matches!(
        error_of("declare x = 1; declare x = 2;"),
        RuntimeError::Redeclaration(_)
    ));
}

#[test]
fn test_unknown_variable_is_fatal() {
    assert!(matches!(
        error_of("print(missing);"),
        RuntimeError::UndefinedVariable(_)
    ));
}

#[test]
fn test_while_with_break_and_continue() {
    let output = output_of(
        r#"
        declare i = 0;
        declare total = 0;
        while (i < 10) {
            i = i + 1;
            if (i % 2 == 0) { continue; }
            if (i > 7) { break; }
            total = total + i;
        }
        print(total);
        "#,
    );
    assert_eq!(output, "16\n");
}

#[test]
fn test_if_else_chains() {
    let output = output_of(
        r#"
        func grade(n) {
            if (n >= 90) { return "a"; }
            else if (n >= 50) { return "b"; }
            else { return "c"; }
        }
        print(grade(95) + grade(60) + grade(10));
        "#,
    );
    assert_eq!(output, "abc\n");
}

#[test]
fn test_control_flow_misuse_is_fatal() {
    assert_eq!(error_of("return 1;"), RuntimeError::ReturnOutsideFunction);
    assert_eq!(error_of("break;"), RuntimeError::LoopControlOutside("break"));
    assert_eq!(
        error_of("continue;"),
        RuntimeError::LoopControlOutside("continue")
    );
}

// ============================================================================
// Functions
// ============================================================================

#[test]
fn test_defaults_and_closures() {
    let output = output_of(
        r#"
        declare base = 10;
        func add(a, b = base) { return a + b; }
        print(add(1));
        print(add(1, 2));
        "#,
    );
    assert_eq!(output, "11\n3\n");
}

#[test]
fn test_missing_argument_without_default_is_fatal() {
    assert!(matches!(
        error_of("func f(a) { return a; } f();"),
        RuntimeError::TypeError(_)
    ));
}

#[test]
fn test_extra_arguments_are_fatal() {
    assert!(matches!(
        error_of("func f(a) { return a; } f(1, 2);"),
        RuntimeError::TypeError(_)
    ));
}

#[test]
fn test_parameter_annotation_mismatch_is_fatal() {
    let e = error_of(r#"func f(x: number) { return x; } f("s");"#);
    match e {
        RuntimeError::TypeError(msg) => {
            assert!(msg.contains("parameter 'x'"), "got: {}", msg);
            assert!(msg.contains("number"), "got: {}", msg);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_calling_a_non_callable_is_fatal() {
    assert!(matches!(error_of("1();"), RuntimeError::TypeError(_)));
}

#[test]
fn test_function_without_return_yields_null() {
    let output = output_of("func f() { 1; } print(f());");
    assert_eq!(output, "null\n");
}

// ============================================================================
// Exceptions
// ============================================================================

#[test]
fn test_try_throw_catch() {
    let output = output_of(r#"try { throw "boom"; } catch (e) { print("caught " + e); }"#);
    assert_eq!(output, "caught boom\n");
}

#[test]
fn test_throw_propagates_through_calls() {
    let output = output_of(
        r#"
        func inner() { throw { code: 7 }; }
        func outer() { inner(); return null; }
        try { outer(); } catch (e) { print(e.code); }
        "#,
    );
    assert_eq!(output, "7\n");
}

#[test]
fn test_uncaught_throw_is_fatal() {
    assert!(matches!(
        error_of(r#"throw "alone";"#),
        RuntimeError::UncaughtException(_)
    ));
}

#[test]
fn test_native_contract_errors_are_catchable() {
    let output = output_of(r#"try { sqrt("x"); } catch (e) { print("caught: " + e); }"#);
    assert!(output.starts_with("caught: "), "got: {}", output);
}

// ============================================================================
// Objects, arrays, member access
// ============================================================================

#[test]
fn test_object_literals_preserve_order_and_shorthand() {
    let output = output_of(
        r#"
        declare b = 2;
        declare o = { z: 1, b, a: 3 };
        print(keys(o));
        "#,
    );
    assert_eq!(output, "[\"z\", \"b\", \"a\"]\n");
}

#[test]
fn test_missing_property_is_null() {
    let output = output_of("declare o = { a: 1 }; print(o.b);");
    assert_eq!(output, "null\n");
}

#[test]
fn test_array_length_and_indexing() {
    let output = output_of(
        r#"
        declare a = [10, 20, 30];
        print(a.length);
        print(a[1]);
        print(a[2.9]);
        "#,
    );
    // indices truncate toward zero
    assert_eq!(output, "3\n20\n30\n");
}

#[test]
fn test_array_index_out_of_bounds_is_fatal() {
    assert!(matches!(
        error_of("declare a = [1]; a[3];"),
        RuntimeError::AccessError(_)
    ));
    assert!(matches!(
        error_of("declare a = [1]; a[-1];"),
        RuntimeError::AccessError(_)
    ));
}

// ============================================================================
// Schemas
// ============================================================================

#[test]
fn test_schema_with_inheritance() {
    let output = output_of(
        r#"
        schema A { required name: string; greet() { return "hi " + name; } }
        schema B extends A { required age: number; }
        declare b = B({ name: "ada", age: 9 });
        print(b.greet());
        print(typeOf(b));
        "#,
    );
    assert_eq!(output, "hi ada\nB\n");
}

#[test]
fn test_positional_instantiation_uses_field_order() {
    let output = output_of(
        r#"
        schema Point { x: number = 0; y: number = 0; }
        declare p = Point(3, 4);
        print(p.x + p.y);
        "#,
    );
    assert_eq!(output, "7\n");
}

#[test]
fn test_constructor_signature_overrides_field_order() {
    let output = output_of(
        r#"
        schema Pair create(second, first) { first; second; }
        declare p = Pair(1, 2);
        print(p.first);
        print(p.second);
        "#,
    );
    assert_eq!(output, "2\n1\n");
}

#[test]
fn test_missing_required_field_is_fatal() {
    let e = error_of("schema R { required a: string; } R({});");
    match e {
        RuntimeError::TypeError(msg) => assert!(msg.contains("required"), "got: {}", msg),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_unknown_named_argument_is_fatal() {
    assert!(matches!(
        error_of("schema S { a; } S({ a: 1, nope: 2 });"),
        RuntimeError::TypeError(_)
    ));
}

#[test]
fn test_field_annotation_mismatch_names_schema_and_field() {
    let e = error_of(r#"schema S { required n: number; } S({ n: "x" });"#);
    match e {
        RuntimeError::TypeError(msg) => {
            assert!(msg.contains("'S'"), "got: {}", msg);
            assert!(msg.contains("'n'"), "got: {}", msg);
            assert!(msg.contains("number"), "got: {}", msg);
            assert!(msg.contains("string"), "got: {}", msg);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_optional_fields_accept_null() {
    let output = output_of(
        r#"
        schema S { optional tag: string; }
        declare s = S({});
        print(s.tag);
        "#,
    );
    assert_eq!(output, "null\n");
}

#[test]
fn test_array_annotations_check_elements() {
    assert!(matches!(
        error_of(r#"schema S { required xs: number[]; } S({ xs: [1, "two"] });"#),
        RuntimeError::TypeError(_)
    ));
}

#[test]
fn test_schema_typed_field_accepts_instance() {
    let output = output_of(
        r#"
        schema Engine { required hp: number; }
        schema Car { required engine: Engine; }
        declare c = Car({ engine: Engine({ hp: 90 }) });
        print(c.engine.hp);
        "#,
    );
    assert_eq!(output, "90\n");
}

#[test]
fn test_method_field_write_back() {
    let output = output_of(
        r#"
        schema Counter { count: number = 0; bump(by: number = 1) { count = count + by; return count; } }
        declare c = Counter({});
        c.bump();
        c.bump(4);
        print(c.count);
        "#,
    );
    assert_eq!(output, "5\n");
}

#[test]
fn test_no_write_back_when_method_throws() {
    let output = output_of(
        r#"
        schema S { x: number = 0; blow() { x = 99; throw "bad"; } }
        declare s = S({});
        try { s.blow(); } catch (e) {}
        print(s.x);
        "#,
    );
    assert_eq!(output, "0\n");
}

#[test]
fn test_parameter_shadowing_a_field() {
    let output = output_of(
        r#"
        schema S { x: number = 1; set_x(x: number) { return x; } }
        declare s = S({});
        print(s.set_x(42));
        print(s.x);
        "#,
    );
    // the parameter overwrites the field local, and write-back commits it
    assert_eq!(output, "42\n42\n");
}

#[test]
fn test_default_save_produces_tagged_payload() {
    let output = output_of(
        r#"
        schema User { required name: string; age: number = 3; }
        declare u = User({ name: "ada" });
        declare payload = u.save();
        print(payload.__schema);
        print(payload.name + " " + payload.age);
        "#,
    );
    assert_eq!(output, "User\nada 3\n");
}

#[test]
fn test_extending_a_non_class_is_fatal() {
    assert!(matches!(
        error_of("declare x = 1; schema S extends x { a; }"),
        RuntimeError::TypeError(_)
    ));
}

// ============================================================================
// Native library
// ============================================================================

#[test]
fn test_math_natives() {
    let output = output_of(
        "print(abs(-3)); print(sqrt(9)); print(pow(2, 10)); print(max(1, 5, 2)); print(min([4, 2, 8])); print(clamp(15, 0, 10)); print(round(2.5)); print(floor(2.9)); print(ceil(2.1));",
    );
    assert_eq!(output, "3\n3\n1024\n5\n2\n10\n3\n2\n3\n");
}

#[test]
fn test_string_natives() {
    let output = output_of(
        r#"
        print(strlen("hello"));
        print(uppercase("abc") + lowercase("DE"));
        print(contains("haystack", "hay"));
        print(split("a,b,c", ","));
        print(trim("  x  "));
        print(toNumber("42") + 1);
        print(toString(7) + "!");
        "#,
    );
    assert_eq!(
        output,
        "5\nABCde\ntrue\n[\"a\", \"b\", \"c\"]\nx\n43\n7!\n"
    );
}

#[test]
fn test_collection_natives() {
    let output = output_of(
        r#"
        declare o = { a: 1, b: 2 };
        print(len(o));
        print(values(o));
        print(entries(o));
        print(len([1, 2, 3]));
        print(len("four"));
        "#,
    );
    assert_eq!(output, "2\n[1, 2]\n[[\"a\", 1], [\"b\", 2]]\n3\n4\n");
}

#[test]
fn test_clone_makes_new_identity() {
    let output = output_of(
        r#"
        declare o = { a: [1] };
        declare shallow = clone(o);
        declare deep = deepClone(o);
        print(shallow == o);
        print(shallow.a == o.a);
        print(deep.a == o.a);
        "#,
    );
    // shallow copy shares nested arrays, deep copy does not
    assert_eq!(output, "false\ntrue\nfalse\n");
}

#[test]
fn test_assert_throws_catchable_message() {
    let output = output_of(r#"try { assert(1 > 2, "nope"); } catch (e) { print("caught " + e); }"#);
    assert_eq!(output, "caught nope\n");
}

#[test]
fn test_type_of() {
    let output = output_of(
        r#"
        print(typeOf(null), typeOf(1), typeOf("s"), typeOf(true));
        print(typeOf([1]), typeOf({ a: 1 }));
        func f() { return null; }
        print(typeOf(f), typeOf(print));
        "#,
    );
    assert_eq!(
        output,
        "null number string boolean\narray object\nfunction function\n"
    );
}

#[test]
fn test_schema_info() {
    let output = output_of(
        r#"
        schema A { required name: string; greet() { return name; } }
        schema B extends A { age: number = 1; }
        declare info = schemaInfo(B);
        print(info.kind, info.name, info.extends);
        print(info.fields[0].name, info.fields[0].required);
        print(info.fields[1].hasDefault);
        print(info.methods[0]);
        declare b = B({ name: "x" });
        print(schemaInfo(b).kind, schemaInfo(b).values.age);
        "#,
    );
    assert_eq!(
        output,
        "schema B A\nname true\ntrue\ngreet\ninstance 1\n"
    );
}

#[test]
fn test_log_natives_are_prefixed() {
    let output = output_of(r#"debug("d"); info("i"); warn("w"); error("e");"#);
    assert_eq!(output, "[debug] d\n[info] i\n[warn] w\n[error] e\n");
}

#[test]
fn test_uuid_is_unique() {
    let output = output_of("print(uuid() == uuid()); print(strlen(uuid()));");
    assert_eq!(output, "false\n36\n");
}

// ============================================================================
// Cooperative asynchrony
// ============================================================================

#[test]
fn test_await_sleep() {
    let output = output_of(r#"declare p = sleep(1); await p; print("done");"#);
    assert_eq!(output, "done\n");
}

#[test]
fn test_await_passes_non_promises_through() {
    let output = output_of("print(await 5);");
    assert_eq!(output, "5\n");
}

#[test]
fn test_schedule_runs_before_exit() {
    let output = output_of(
        r#"
        func tick(msg) { print(msg); }
        schedule(5, tick, ["later"]);
        print("first");
        "#,
    );
    assert_eq!(output, "first\nlater\n");
}

#[test]
fn test_schedule_snapshot_is_deep_cloned() {
    let output = output_of(
        r#"
        func show(o) { print(o.n); }
        declare payload = { n: 1 };
        schedule(1, show, [payload]);
        declare other = payload;
        print("sync");
        "#,
    );
    assert_eq!(output, "sync\n1\n");
}

#[test]
fn test_scheduled_task_runs_at_await_boundary() {
    let output = output_of(
        r#"
        func tick() { print("tick"); }
        schedule(1, tick, []);
        await sleep(20);
        print("after");
        "#,
    );
    assert_eq!(output, "tick\nafter\n");
}

// tests/module_tests.rs
//
// Module loading against real files in a temporary directory.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use datascript::{Error, Interpreter, RuntimeError, Value};

fn fixture_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "datascript-module-tests-{}-{}",
        std::process::id(),
        name
    ));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).expect("create fixture dir");
    dir
}

fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).expect("write fixture file");
    path
}

fn run_file(path: &Path) -> (Result<Value, Error>, String) {
    let buffer = Rc::new(RefCell::new(String::new()));
    let sink = buffer.clone();
    let mut interp = Interpreter::new().with_output(move |text| sink.borrow_mut().push_str(text));
    let result = interp.run_file(path);
    let output = buffer.borrow().clone();
    (result, output)
}

#[test]
fn test_import_exposing() {
    let dir = fixture_dir("exposing");
    write_file(&dir, "m.ds", "export func add(a, b) { return a + b; }");
    let main = write_file(&dir, "main.ds", r#"import "./m.ds" exposing { add }; print(add(2, 40));"#);

    let (result, output) = run_file(&main);
    result.unwrap();
    assert_eq!(output, "42\n");
}

#[test]
fn test_namespace_and_default_bindings() {
    let dir = fixture_dir("namespace");
    write_file(
        &dir,
        "d.ds",
        r#"
        export default func mul(a, b) { return a * b; }
        export declare pi = 3;
        "#,
    );
    let main = write_file(
        &dir,
        "main.ds",
        r#"
        import "./d.ds" as d default mul;
        print(mul(6, 7));
        print(d.pi);
        print(d.default == mul);
        "#,
    );

    let (result, output) = run_file(&main);
    result.unwrap();
    assert_eq!(output, "42\n3\ntrue\n");
}

#[test]
fn test_export_specifier_list() {
    let dir = fixture_dir("specifiers");
    write_file(
        &dir,
        "lib.ds",
        r#"
        declare pi = 3;
        func area(r) { return pi * r * r; }
        export { pi, area };
        "#,
    );
    let main = write_file(
        &dir,
        "main.ds",
        r#"import "./lib.ds" exposing { area }; print(area(2));"#,
    );

    let (result, output) = run_file(&main);
    result.unwrap();
    assert_eq!(output, "12\n");
}

#[test]
fn test_module_namespace_identity_is_shared() {
    let dir = fixture_dir("identity");
    write_file(&dir, "m.ds", "export declare v = 1;");
    let main = write_file(
        &dir,
        "main.ds",
        r#"
        import "./m.ds" as a;
        import "./m.ds" as b;
        print(a == b);
        "#,
    );

    let (result, output) = run_file(&main);
    result.unwrap();
    assert_eq!(output, "true\n");
}

#[test]
fn test_extension_is_appended() {
    let dir = fixture_dir("extension");
    write_file(&dir, "m.ds", "export declare v = 5;");
    let main = write_file(&dir, "main.ds", r#"import "./m" exposing { v }; print(v);"#);

    let (result, output) = run_file(&main);
    result.unwrap();
    assert_eq!(output, "5\n");
}

#[test]
fn test_missing_export_is_fatal() {
    let dir = fixture_dir("missing-export");
    write_file(&dir, "m.ds", "export declare v = 1;");
    let main = write_file(&dir, "main.ds", r#"import "./m.ds" exposing { nope };"#);

    let (result, _) = run_file(&main);
    match result {
        Err(Error::Runtime(RuntimeError::ImportError(msg))) => {
            assert!(msg.contains("nope"), "got: {}", msg);
        }
        other => panic!("expected an import error, got {:?}", other),
    }
}

#[test]
fn test_missing_default_is_fatal() {
    let dir = fixture_dir("missing-default");
    write_file(&dir, "m.ds", "export declare v = 1;");
    let main = write_file(&dir, "main.ds", r#"import "./m.ds" default v;"#);

    let (result, _) = run_file(&main);
    assert!(matches!(
        result,
        Err(Error::Runtime(RuntimeError::ImportError(_)))
    ));
}

#[test]
fn test_import_binding_clash_is_fatal() {
    let dir = fixture_dir("clash");
    write_file(&dir, "m.ds", "export declare add = 1;");
    let main = write_file(
        &dir,
        "main.ds",
        r#"declare add = 2; import "./m.ds" exposing { add };"#,
    );

    let (result, _) = run_file(&main);
    assert!(matches!(
        result,
        Err(Error::Runtime(RuntimeError::Redeclaration(name))) if name == "add"
    ));
}

#[test]
fn test_circular_import_names_the_path() {
    let dir = fixture_dir("cycle");
    write_file(&dir, "c1.ds", r#"import "./c2.ds"; export declare a = 1;"#);
    write_file(&dir, "c2.ds", r#"import "./c1.ds"; export declare b = 1;"#);
    let main = write_file(&dir, "main.ds", r#"import "./c1.ds";"#);

    let (result, _) = run_file(&main);
    match result {
        Err(Error::Runtime(RuntimeError::CircularImport(path))) => {
            assert!(path.contains("c1.ds"), "got: {}", path);
        }
        other => panic!("expected a circular import error, got {:?}", other),
    }
}

#[test]
fn test_relative_imports_resolve_from_the_importing_module() {
    let dir = fixture_dir("nested");
    fs::create_dir_all(dir.join("sub")).unwrap();
    write_file(&dir, "sub/leaf.ds", "export declare v = 9;");
    write_file(
        &dir,
        "sub/mid.ds",
        r#"import "./leaf.ds" exposing { v }; export declare w = v + 1;"#,
    );
    let main = write_file(
        &dir,
        "main.ds",
        r#"import "./sub/mid.ds" exposing { w }; print(w);"#,
    );

    let (result, output) = run_file(&main);
    result.unwrap();
    assert_eq!(output, "10\n");
}

#[test]
fn test_module_side_effects_run_once() {
    let dir = fixture_dir("once");
    write_file(&dir, "m.ds", r#"print("loaded"); export declare v = 1;"#);
    let main = write_file(
        &dir,
        "main.ds",
        r#"
        import "./m.ds" as a;
        import "./m.ds" as b;
        print(a.v + b.v);
        "#,
    );

    let (result, output) = run_file(&main);
    result.unwrap();
    assert_eq!(output, "loaded\n2\n");
}

#[test]
fn test_failed_module_is_evicted_and_not_cached() {
    let dir = fixture_dir("evict");
    write_file(&dir, "bad.ds", r#"throw "nope";"#);
    let main = write_file(
        &dir,
        "main.ds",
        r#"
        try { import "./bad.ds"; } catch (e) { print("caught " + e); }
        try { import "./bad.ds"; } catch (e) { print("again " + e); }
        "#,
    );

    // the partial result is evicted, so the second import re-runs the
    // module and observes the same exception
    let (result, output) = run_file(&main);
    result.unwrap();
    assert_eq!(output, "caught nope\nagain nope\n");
}

//! End-to-end runs of the `formica` binary over small fixture projects.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

fn formica() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("formica"))
}

fn write(path: &Path, text: &str) {
    std::fs::write(path, text).unwrap();
}

#[test]
fn help_mentions_every_subcommand() {
    formica().arg("--help").assert().success().stdout(
        predicate::str::contains("targets")
            .and(predicate::str::contains("property"))
            .and(predicate::str::contains("tags"))
            .and(predicate::str::contains("check")),
    );
}

#[test]
fn targets_lists_effective_names_and_the_default() {
    let dir = tempfile::tempdir().unwrap();
    write(
        &dir.path().join("build.xml"),
        r#"<project name="app" default="dist">
             <target name="dist" depends="compile"/>
             <target name="compile"/>
             <include file="util.xml" as="util"/>
           </project>"#,
    );
    write(
        &dir.path().join("util.xml"),
        r#"<project name="util">
             <target name="fmt"/>
           </project>"#,
    );

    formica()
        .arg("targets")
        .arg(dir.path().join("build.xml"))
        .assert()
        .success()
        .stdout(
            predicate::str::contains("default: dist")
                .and(predicate::str::contains("util.fmt"))
                .and(predicate::str::contains("depends: compile")),
        );
}

#[test]
fn target_references_resolve_or_fail_the_run() {
    let dir = tempfile::tempdir().unwrap();
    write(
        &dir.path().join("build.xml"),
        r#"<project name="app">
             <target name="compile"/>
           </project>"#,
    );

    formica()
        .arg("targets")
        .arg(dir.path().join("build.xml"))
        .args(["compile", "nope"])
        .assert()
        .code(1)
        .stdout(
            predicate::str::contains("compile -> compile")
                .and(predicate::str::contains("nope: not found")),
        );
}

#[test]
fn properties_expand_and_user_definitions_win() {
    let dir = tempfile::tempdir().unwrap();
    let build = dir.path().join("build.xml");
    write(
        &build,
        r#"<project name="app">
             <property name="version" value="1.2"/>
             <property name="artifact" value="app-${version}.jar"/>
           </project>"#,
    );

    formica()
        .arg("property")
        .arg(&build)
        .arg("artifact")
        .assert()
        .success()
        .stdout(predicate::str::contains("artifact = app-1.2.jar"));

    let assert = formica()
        .arg("property")
        .arg(&build)
        .arg("artifact")
        .arg("-Dversion=9.9")
        .arg("--json")
        .assert()
        .success();
    let report: Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(report["value"], "app-9.9.jar");
}

#[test]
fn property_files_feed_user_properties() {
    let dir = tempfile::tempdir().unwrap();
    let build = dir.path().join("build.xml");
    write(
        &build,
        r#"<project name="app">
             <property name="artifact" value="app-${version}.jar"/>
           </project>"#,
    );
    write(&dir.path().join("user.properties"), "version=7.7\n");

    formica()
        .arg("property")
        .arg(&build)
        .arg("artifact")
        .arg("--property-file")
        .arg(dir.path().join("user.properties"))
        .assert()
        .success()
        .stdout(predicate::str::contains("app-7.7.jar"));

    // -D wins over the file.
    formica()
        .arg("property")
        .arg(&build)
        .arg("artifact")
        .arg("--property-file")
        .arg(dir.path().join("user.properties"))
        .arg("-Dversion=8.8")
        .assert()
        .success()
        .stdout(predicate::str::contains("app-8.8.jar"));
}

#[test]
fn an_undefined_property_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let build = dir.path().join("build.xml");
    write(&build, r#"<project name="app"/>"#);

    formica()
        .arg("property")
        .arg(&build)
        .arg("missing")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("missing is not defined"));
}

#[test]
fn omitting_the_property_name_lists_variants() {
    let dir = tempfile::tempdir().unwrap();
    let build = dir.path().join("build.xml");
    write(
        &build,
        r#"<project name="app">
             <property name="version" value="1.2"/>
             <property name="artifact" value="app.jar"/>
           </project>"#,
    );

    formica()
        .arg("property")
        .arg(&build)
        .assert()
        .success()
        .stdout(predicate::str::contains("artifact").and(predicate::str::contains("version")));
}

#[test]
fn tags_reports_broken_declarations_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let build = dir.path().join("build.xml");
    write(
        &build,
        r#"<project name="app">
             <typedef name="broken" classname="com.example.Missing"/>
           </project>"#,
    );

    let assert = formica()
        .arg("tags")
        .arg(&build)
        .arg("--json")
        .assert()
        .success();
    let report: Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(report["tags"][0]["name"], "broken");
    assert_eq!(report["tags"][0]["kind"], "type");
    assert!(report["tags"][0]["error"]
        .as_str()
        .unwrap()
        .contains("not found"));
}

#[test]
fn check_reports_duplicates_and_unknown_dependencies() {
    let dir = tempfile::tempdir().unwrap();
    let build = dir.path().join("build.xml");
    write(
        &build,
        r#"<project name="app">
             <target name="build" depends="nope"/>
             <target name="build"/>
           </project>"#,
    );

    formica()
        .arg("check")
        .arg(&build)
        .assert()
        .code(1)
        .stdout(
            predicate::str::contains("already defined")
                .and(predicate::str::contains("depends on unknown target nope"))
                .and(predicate::str::contains("finding(s)")),
        );
}

#[test]
fn check_passes_on_a_clean_project() {
    let dir = tempfile::tempdir().unwrap();
    let build = dir.path().join("build.xml");
    write(
        &build,
        r#"<project name="app" default="dist">
             <target name="dist" depends="compile"/>
             <target name="compile"/>
           </project>"#,
    );

    formica()
        .arg("check")
        .arg(&build)
        .assert()
        .success()
        .stdout(predicate::str::contains("0 finding(s)"));
}

#[test]
fn malformed_definitions_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let build = dir.path().join("build.xml");
    write(&build, r#"<project name="app"/>"#);

    formica()
        .arg("property")
        .arg(&build)
        .arg("anything")
        .arg("-Doops")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("malformed definition"));
}

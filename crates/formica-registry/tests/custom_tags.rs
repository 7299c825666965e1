//! Custom-tag discovery end to end: macro and script scoping, typedef
//! class loading against real class files and jars, resource-backed bulk
//! registrations, antlib namespaces, and the fingerprint-keyed cache.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use formica_classpath::{ClasspathEntry, LoaderContext};
use formica_core::CancellationToken;
use formica_registry::{CustomTagRegistry, RegistryCache, RegistryOptions, TagKey};
use formica_syntax::workspace::LoadOptions;
use formica_syntax::{ElementHandle, LocalFs, MemoryFs, QName, Workspace};
use pretty_assertions::assert_eq;

fn load_memory(fs: &MemoryFs, root: &str) -> Workspace {
    Workspace::load(fs, Path::new(root), &LoadOptions::default()).expect("workspace loads")
}

fn load_disk(root: &Path) -> Workspace {
    Workspace::load(&LocalFs, root, &LoadOptions::default()).expect("workspace loads")
}

fn build(ws: &Workspace, options: &RegistryOptions) -> CustomTagRegistry {
    CustomTagRegistry::build(ws, options, &CancellationToken::new()).expect("registry builds")
}

fn handle_of(ws: &Workspace, path: &Path, tag: &str) -> ElementHandle {
    let id = ws.file_id(path).expect("file loaded");
    let file = ws.build_file(id).expect("build file");
    for element in file.elements() {
        if file.tag(element).local == tag {
            return file.handle(element);
        }
    }
    panic!("no <{tag}> in {}", path.display());
}

fn qname(name: &str) -> QName {
    QName::new(name, None)
}

fn names<'a>(variants: &[&'a TagKey]) -> Vec<&'a str> {
    variants.iter().map(|key| key.name.as_str()).collect()
}

/// A minimal class-file header: magic, minor 0, the given major.
fn class_bytes(major: u16) -> Vec<u8> {
    let mut bytes = 0xCAFE_BABE_u32.to_be_bytes().to_vec();
    bytes.extend_from_slice(&[0, 0]);
    bytes.extend_from_slice(&major.to_be_bytes());
    bytes
}

fn write_class(dir: &Path, binary_name: &str, major: u16) {
    let rel = format!("{}.class", binary_name.replace('.', "/"));
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().expect("class file has a parent")).unwrap();
    std::fs::write(path, class_bytes(major)).unwrap();
}

fn write_jar(path: &Path, files: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, bytes) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap();
}

#[test]
fn macrodef_registers_the_tag_and_scopes_its_elements() {
    let fs = MemoryFs::new().with_file(
        "/ws/build.xml",
        r#"<project name="p">
             <macrodef name="compile-module">
               <attribute name="module"/>
               <element name="extra-sources"/>
               <sequential>
                 <echo message="@{module}"/>
               </sequential>
             </macrodef>
             <target name="build"/>
           </project>"#,
    );
    let ws = load_memory(&fs, "/ws/build.xml");
    let registry = build(&ws, &RegistryOptions::default());

    let macro_handle = handle_of(&ws, Path::new("/ws/build.xml"), "macrodef");
    assert_eq!(
        registry.declaring_element(&qname("compile-module")),
        Some(macro_handle)
    );
    assert_eq!(registry.implementation(&qname("compile-module")), None);
    assert_eq!(registry.tag_error(&qname("compile-module")), None);

    let inside = handle_of(&ws, Path::new("/ws/build.xml"), "echo");
    let outside = handle_of(&ws, Path::new("/ws/build.xml"), "target");
    assert!(names(&registry.completion_variants(&ws, inside)).contains(&"extra-sources"));
    assert!(!names(&registry.completion_variants(&ws, outside)).contains(&"extra-sources"));
}

#[test]
fn scriptdef_elements_copy_types_from_known_names() {
    let fs = MemoryFs::new().with_file(
        "/ws/build.xml",
        r#"<project name="p">
             <typedef name="grid" classname="com.acme.Grid"/>
             <scriptdef name="layout" language="javascript">
               <element name="cell" type="grid"/>
               <element name="lane" type="path"/>
               <element name="probe" classname="com.acme.Probe"/>
               <![CDATA[ self.log("noop"); ]]>
             </scriptdef>
           </project>"#,
    );
    let ws = load_memory(&fs, "/ws/build.xml");
    let registry = build(&ws, &RegistryOptions::default());

    // Nothing is on any classpath, so every lookup fails, but the error
    // names the class each element ended up bound to.
    assert_eq!(
        registry.tag_error(&qname("cell")),
        Some("class com.acme.Grid not found".to_string())
    );
    assert_eq!(
        registry.tag_error(&qname("lane")),
        Some("class org.apache.tools.ant.types.Path not found".to_string())
    );
    assert_eq!(
        registry.tag_error(&qname("probe")),
        Some("class com.acme.Probe not found".to_string())
    );
    assert_eq!(registry.tag_error(&qname("layout")), None);
}

#[test]
fn typedef_with_a_real_class_resolves() {
    let dir = tempfile::tempdir().unwrap();
    write_class(&dir.path().join("classes"), "com.example.Tool", 52);
    std::fs::write(
        dir.path().join("build.xml"),
        r#"<project name="p">
             <typedef name="tool" classname="com.example.Tool" classpath="classes"/>
           </project>"#,
    )
    .unwrap();
    let ws = load_disk(&dir.path().join("build.xml"));
    let registry = build(&ws, &RegistryOptions::default());

    let summary = registry
        .implementation(&qname("tool"))
        .expect("class resolves");
    assert_eq!(summary.binary_name, "com.example.Tool");
    assert_eq!(summary.major_version, 52);
    assert_eq!(registry.tag_error(&qname("tool")), None);
}

#[test]
fn a_bogus_class_fails_alone() {
    let fs = MemoryFs::new().with_file(
        "/ws/build.xml",
        r#"<project name="p">
             <typedef name="broken" classname="com.example.Missing"/>
             <macrodef name="fine">
               <sequential/>
             </macrodef>
           </project>"#,
    );
    let ws = load_memory(&fs, "/ws/build.xml");
    let registry = build(&ws, &RegistryOptions::default());

    assert_eq!(registry.implementation(&qname("broken")), None);
    assert_eq!(
        registry.tag_error(&qname("broken")),
        Some("class com.example.Missing not found".to_string())
    );
    let typedef = handle_of(&ws, Path::new("/ws/build.xml"), "typedef");
    assert_eq!(registry.declaration_error(typedef), None);

    // The sibling declaration is untouched.
    assert!(registry.declaring_element(&qname("fine")).is_some());
    assert_eq!(registry.tag_error(&qname("fine")), None);
}

#[test]
fn typedef_resources_register_every_entry() {
    let dir = tempfile::tempdir().unwrap();
    write_jar(
        &dir.path().join("acme.jar"),
        &[(
            "org/acme/types.properties",
            b"tool=org.acme.Tool\nhelper=org.acme.Helper\n".as_slice(),
        )],
    );
    std::fs::write(
        dir.path().join("build.xml"),
        r#"<project name="p">
             <typedef resource="org/acme/types.properties" classpath="acme.jar"/>
           </project>"#,
    )
    .unwrap();
    let ws = load_disk(&dir.path().join("build.xml"));
    let registry = build(&ws, &RegistryOptions::default());

    let typedef = handle_of(&ws, &dir.path().join("build.xml"), "typedef");
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.declaration_error(typedef), None);
    assert_eq!(
        registry.tag_error(&qname("tool")),
        Some("class org.acme.Tool not found".to_string())
    );
    assert_eq!(
        registry.tag_error(&qname("helper")),
        Some("class org.acme.Helper not found".to_string())
    );
}

#[test]
fn antlib_format_resources_keep_task_and_type_apart() {
    let dir = tempfile::tempdir().unwrap();
    write_jar(
        &dir.path().join("acme.jar"),
        &[(
            "org/acme/antlib.xml",
            br#"<antlib>
                  <taskdef name="tool" classname="org.acme.Tool"/>
                  <typedef name="grid" classname="org.acme.Grid"/>
                </antlib>"#
                .as_slice(),
        )],
    );
    std::fs::write(
        dir.path().join("build.xml"),
        r#"<project name="p">
             <typedef resource="org/acme/antlib.xml" classpath="acme.jar"/>
             <path id="build.path"/>
             <target name="build"/>
           </project>"#,
    )
    .unwrap();
    let ws = load_disk(&dir.path().join("build.xml"));
    let registry = build(&ws, &RegistryOptions::default());

    let in_path = handle_of(&ws, &dir.path().join("build.xml"), "path");
    let in_target = handle_of(&ws, &dir.path().join("build.xml"), "target");
    assert_eq!(
        names(&registry.completion_variants(&ws, in_path)),
        vec!["grid"]
    );
    assert_eq!(
        names(&registry.completion_variants(&ws, in_target)),
        vec!["grid", "tool"]
    );
}

#[test]
fn a_missing_typedef_resource_is_a_declaration_error() {
    let fs = MemoryFs::new().with_file(
        "/ws/build.xml",
        r#"<project name="p">
             <typedef resource="no/such/types.properties"/>
             <macrodef name="fine">
               <sequential/>
             </macrodef>
           </project>"#,
    );
    let ws = load_memory(&fs, "/ws/build.xml");
    let registry = build(&ws, &RegistryOptions::default());

    let typedef = handle_of(&ws, Path::new("/ws/build.xml"), "typedef");
    let error = registry
        .declaration_error(typedef)
        .expect("missing resource is recorded");
    assert!(error.contains("no/such/types.properties"), "{error}");
    assert!(registry.declaring_element(&qname("fine")).is_some());
}

#[test]
fn antlib_namespaces_load_from_the_base_loader() {
    let dir = tempfile::tempdir().unwrap();
    let jar = dir.path().join("acme.jar");
    let tool_class = class_bytes(52);
    write_jar(
        &jar,
        &[
            (
                "org/acme/antlib.xml",
                br#"<antlib><taskdef name="tool" classname="org.acme.Tool"/></antlib>"#.as_slice(),
            ),
            ("org/acme/Tool.class", tool_class.as_slice()),
        ],
    );
    let fs = MemoryFs::new().with_file(
        "/ws/build.xml",
        r#"<project name="p" xmlns:acme="antlib:org.acme">
             <target name="build">
               <acme:tool/>
             </target>
           </project>"#,
    );
    let ws = load_memory(&fs, "/ws/build.xml");
    let options = RegistryOptions {
        base_loader: Arc::new(LoaderContext::new(vec![ClasspathEntry::Jar(jar)])),
    };
    let registry = build(&ws, &options);

    let tag = QName::new("tool", Some("antlib:org.acme".to_string()));
    let summary = registry.implementation(&tag).expect("class resolves");
    assert_eq!(summary.binary_name, "org.acme.Tool");
    let declaring = registry.declaring_element(&tag).expect("declared");
    let project = handle_of(&ws, Path::new("/ws/build.xml"), "project");
    assert_eq!(declaring, project);
}

#[test]
fn a_missing_antlib_attaches_to_the_consuming_element() {
    let fs = MemoryFs::new().with_file(
        "/ws/build.xml",
        r#"<project name="p" xmlns:acme="antlib:org.acme">
             <target name="build"/>
           </project>"#,
    );
    let ws = load_memory(&fs, "/ws/build.xml");
    let registry = build(&ws, &RegistryOptions::default());

    let project = handle_of(&ws, Path::new("/ws/build.xml"), "project");
    let error = registry
        .declaration_error(project)
        .expect("missing antlib is recorded");
    assert!(error.contains("org/acme/antlib.xml"), "{error}");
}

#[test]
fn later_definitions_override_earlier_ones() {
    let fs = MemoryFs::new()
        .with_file(
            "/ws/build.xml",
            r#"<project name="p">
                 <typedef name="tool" classname="com.example.Old"/>
                 <import file="more.xml"/>
               </project>"#,
        )
        .with_file(
            "/ws/more.xml",
            r#"<project name="q">
                 <typedef name="tool" classname="com.example.New"/>
               </project>"#,
        );
    let ws = load_memory(&fs, "/ws/build.xml");
    let registry = build(&ws, &RegistryOptions::default());

    let winner = handle_of(&ws, Path::new("/ws/more.xml"), "typedef");
    assert_eq!(registry.declaring_element(&qname("tool")), Some(winner));
    assert_eq!(
        registry.tag_error(&qname("tool")),
        Some("class com.example.New not found".to_string())
    );
}

#[test]
fn classpath_reference_cycles_terminate() {
    let fs = MemoryFs::new().with_file(
        "/ws/build.xml",
        r#"<project name="p">
             <path id="a">
               <path refid="b"/>
             </path>
             <path id="b">
               <path refid="a"/>
             </path>
             <typedef name="tool" classname="com.example.Tool" classpathref="a"/>
           </project>"#,
    );
    let ws = load_memory(&fs, "/ws/build.xml");
    let registry = build(&ws, &RegistryOptions::default());

    assert!(registry.declaring_element(&qname("tool")).is_some());
    assert_eq!(
        registry.tag_error(&qname("tool")),
        Some("class com.example.Tool not found".to_string())
    );
}

#[test]
fn loaderref_shares_one_loader_between_declarations() {
    let dir = tempfile::tempdir().unwrap();
    write_class(&dir.path().join("classes"), "com.example.First", 52);
    write_class(&dir.path().join("classes"), "com.example.Second", 52);
    std::fs::write(
        dir.path().join("build.xml"),
        r#"<project name="p">
             <typedef name="first" classname="com.example.First"
                      classpath="classes" loaderref="shared"/>
             <typedef name="second" classname="com.example.Second" loaderref="shared"/>
           </project>"#,
    )
    .unwrap();
    let ws = load_disk(&dir.path().join("build.xml"));
    let registry = build(&ws, &RegistryOptions::default());

    // The second declaration has no classpath of its own; it resolves only
    // because it reuses the loader the first one created.
    assert!(registry.implementation(&qname("first")).is_some());
    assert!(registry.implementation(&qname("second")).is_some());
}

#[test]
fn canceled_builds_propagate_and_are_never_cached() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("build.xml"),
        r#"<project name="p">
             <macrodef name="fine">
               <sequential/>
             </macrodef>
           </project>"#,
    )
    .unwrap();
    let ws = load_disk(&dir.path().join("build.xml"));
    let cache = RegistryCache::new();

    let canceled = CancellationToken::new();
    canceled.cancel();
    assert!(cache
        .registry(&ws, &RegistryOptions::default(), &canceled)
        .is_err());

    let registry = cache
        .registry(&ws, &RegistryOptions::default(), &CancellationToken::new())
        .expect("clean build after a canceled one");
    assert!(registry.declaring_element(&qname("fine")).is_some());
}

#[test]
fn the_cache_rebuilds_only_on_fingerprint_changes() {
    let dir = tempfile::tempdir().unwrap();
    let build_file = dir.path().join("build.xml");
    std::fs::write(
        &build_file,
        r#"<project name="p">
             <macrodef name="fine">
               <sequential/>
             </macrodef>
           </project>"#,
    )
    .unwrap();
    let cache = RegistryCache::new();
    let token = CancellationToken::new();

    let first_load = load_disk(&build_file);
    let second_load = load_disk(&build_file);
    assert_eq!(first_load.fingerprint(), second_load.fingerprint());
    let first = cache
        .registry(&first_load, &RegistryOptions::default(), &token)
        .unwrap();
    let second = cache
        .registry(&second_load, &RegistryOptions::default(), &token)
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    std::fs::write(
        &build_file,
        r#"<project name="p">
             <macrodef name="other">
               <sequential/>
             </macrodef>
           </project>"#,
    )
    .unwrap();
    let third_load = load_disk(&build_file);
    assert_ne!(first_load.fingerprint(), third_load.fingerprint());
    let third = cache
        .registry(&third_load, &RegistryOptions::default(), &token)
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
    assert!(third.declaring_element(&qname("other")).is_some());
}

#[test]
fn registries_are_shareable_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<CustomTagRegistry>();
    assert_send_sync::<RegistryCache>();
}

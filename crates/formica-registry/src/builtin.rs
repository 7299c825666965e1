//! Tags bundled with the Ant runtime itself.
//!
//! The tables mirror the `defaults.properties` listings the runtime ships;
//! only the entries a build file can plausibly reach are kept. They back
//! two registry behaviors: a `<scriptdef>` element may copy its type from
//! a core name, and completion filtering needs to know which names denote
//! tasks rather than data types.

/// Core tasks, keyed by tag name.
pub const CORE_TASKS: &[(&str, &str)] = &[
    ("ant", "org.apache.tools.ant.taskdefs.Ant"),
    ("antcall", "org.apache.tools.ant.taskdefs.CallTarget"),
    ("antstructure", "org.apache.tools.ant.taskdefs.AntStructure"),
    ("apply", "org.apache.tools.ant.taskdefs.Transform"),
    ("available", "org.apache.tools.ant.taskdefs.Available"),
    ("basename", "org.apache.tools.ant.taskdefs.Basename"),
    ("buildnumber", "org.apache.tools.ant.taskdefs.BuildNumber"),
    ("checksum", "org.apache.tools.ant.taskdefs.Checksum"),
    ("chmod", "org.apache.tools.ant.taskdefs.Chmod"),
    ("concat", "org.apache.tools.ant.taskdefs.Concat"),
    ("condition", "org.apache.tools.ant.taskdefs.ConditionTask"),
    ("copy", "org.apache.tools.ant.taskdefs.Copy"),
    ("delete", "org.apache.tools.ant.taskdefs.Delete"),
    ("dirname", "org.apache.tools.ant.taskdefs.Dirname"),
    ("echo", "org.apache.tools.ant.taskdefs.Echo"),
    ("exec", "org.apache.tools.ant.taskdefs.ExecTask"),
    ("fail", "org.apache.tools.ant.taskdefs.Exit"),
    ("filter", "org.apache.tools.ant.taskdefs.Filter"),
    ("fixcrlf", "org.apache.tools.ant.taskdefs.FixCRLF"),
    ("get", "org.apache.tools.ant.taskdefs.Get"),
    ("gunzip", "org.apache.tools.ant.taskdefs.GUnzip"),
    ("gzip", "org.apache.tools.ant.taskdefs.GZip"),
    ("import", "org.apache.tools.ant.taskdefs.ImportTask"),
    ("input", "org.apache.tools.ant.taskdefs.Input"),
    ("jar", "org.apache.tools.ant.taskdefs.Jar"),
    ("java", "org.apache.tools.ant.taskdefs.Java"),
    ("javac", "org.apache.tools.ant.taskdefs.Javac"),
    ("javadoc", "org.apache.tools.ant.taskdefs.Javadoc"),
    ("length", "org.apache.tools.ant.taskdefs.Length"),
    ("loadfile", "org.apache.tools.ant.taskdefs.LoadFile"),
    ("loadproperties", "org.apache.tools.ant.taskdefs.LoadProperties"),
    ("loadresource", "org.apache.tools.ant.taskdefs.LoadResource"),
    ("macrodef", "org.apache.tools.ant.taskdefs.MacroDef"),
    ("mail", "org.apache.tools.ant.taskdefs.email.EmailTask"),
    ("mkdir", "org.apache.tools.ant.taskdefs.Mkdir"),
    ("move", "org.apache.tools.ant.taskdefs.Move"),
    ("parallel", "org.apache.tools.ant.taskdefs.Parallel"),
    ("patch", "org.apache.tools.ant.taskdefs.Patch"),
    ("pathconvert", "org.apache.tools.ant.taskdefs.PathConvert"),
    ("presetdef", "org.apache.tools.ant.taskdefs.PreSetDef"),
    ("property", "org.apache.tools.ant.taskdefs.Property"),
    ("record", "org.apache.tools.ant.taskdefs.Recorder"),
    ("replace", "org.apache.tools.ant.taskdefs.Replace"),
    ("sequential", "org.apache.tools.ant.taskdefs.Sequential"),
    ("signjar", "org.apache.tools.ant.taskdefs.SignJar"),
    ("sleep", "org.apache.tools.ant.taskdefs.Sleep"),
    ("sql", "org.apache.tools.ant.taskdefs.SQLExec"),
    ("subant", "org.apache.tools.ant.taskdefs.SubAnt"),
    ("sync", "org.apache.tools.ant.taskdefs.Sync"),
    ("tar", "org.apache.tools.ant.taskdefs.Tar"),
    ("taskdef", "org.apache.tools.ant.taskdefs.Taskdef"),
    ("touch", "org.apache.tools.ant.taskdefs.Touch"),
    ("tstamp", "org.apache.tools.ant.taskdefs.Tstamp"),
    ("typedef", "org.apache.tools.ant.taskdefs.Typedef"),
    ("unjar", "org.apache.tools.ant.taskdefs.Expand"),
    ("untar", "org.apache.tools.ant.taskdefs.Untar"),
    ("unzip", "org.apache.tools.ant.taskdefs.Expand"),
    ("uptodate", "org.apache.tools.ant.taskdefs.UpToDate"),
    ("waitfor", "org.apache.tools.ant.taskdefs.WaitFor"),
    ("war", "org.apache.tools.ant.taskdefs.War"),
    ("whichresource", "org.apache.tools.ant.taskdefs.WhichResource"),
    ("xmlproperty", "org.apache.tools.ant.taskdefs.XmlProperty"),
    ("xslt", "org.apache.tools.ant.taskdefs.XSLTProcess"),
    ("zip", "org.apache.tools.ant.taskdefs.Zip"),
];

/// Core data types, keyed by tag name.
pub const CORE_TYPES: &[(&str, &str)] = &[
    ("description", "org.apache.tools.ant.types.Description"),
    ("dirset", "org.apache.tools.ant.types.DirSet"),
    ("filelist", "org.apache.tools.ant.types.FileList"),
    ("fileset", "org.apache.tools.ant.types.FileSet"),
    ("filterchain", "org.apache.tools.ant.types.FilterChain"),
    ("filterset", "org.apache.tools.ant.types.FilterSet"),
    ("mapper", "org.apache.tools.ant.types.Mapper"),
    ("path", "org.apache.tools.ant.types.Path"),
    ("patternset", "org.apache.tools.ant.types.PatternSet"),
    ("propertyset", "org.apache.tools.ant.types.PropertySet"),
    ("regexp", "org.apache.tools.ant.types.RegularExpression"),
    ("substitution", "org.apache.tools.ant.types.Substitution"),
    ("xmlcatalog", "org.apache.tools.ant.types.XMLCatalog"),
    ("zipfileset", "org.apache.tools.ant.types.ZipFileSet"),
];

/// Class behind a core task tag.
#[must_use]
pub fn core_task_class(name: &str) -> Option<&'static str> {
    lookup(CORE_TASKS, name)
}

/// Class behind a core data-type tag.
#[must_use]
pub fn core_type_class(name: &str) -> Option<&'static str> {
    lookup(CORE_TYPES, name)
}

/// Whether `name` denotes a task in the core vocabulary.
#[must_use]
pub fn is_core_task(name: &str) -> bool {
    core_task_class(name).is_some()
}

fn lookup(table: &[(&str, &'static str)], name: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(tag, _)| *tag == name)
        .map(|(_, class)| *class)
}

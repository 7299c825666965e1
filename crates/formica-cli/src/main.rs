use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use formica_classpath::{ClasspathEntry, LoaderContext};
use formica_core::{CancellationToken, Location};
use formica_registry::{CustomTagRegistry, RegistryOptions, TagEntryKind};
use formica_resolve::{
    default_target, duplicate_targets, property_value, property_variants, resolve_property,
    resolve_targets,
};
use formica_syntax::workspace::LoadOptions;
use formica_syntax::{ElementHandle, LocalFs, QName, Workspace};
use serde::Serialize;

#[derive(Parser)]
#[command(
    name = "formica",
    version,
    about = "Ant build-file resolution (targets, properties, custom tags)"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List every discovered target, or resolve specific references
    Targets(TargetsArgs),
    /// Resolve one property, or list every property name in scope
    Property(PropertyArgs),
    /// List the custom tags the build graph declares
    Tags(TagsArgs),
    /// Run every analysis and report findings
    Check(CheckArgs),
}

#[derive(Args)]
struct WorkspaceArgs {
    /// Root build file
    build_file: PathBuf,
    /// User property, as -Dname=value; wins over build-file definitions
    #[arg(short = 'D', value_name = "NAME=VALUE")]
    define: Vec<String>,
    /// Properties file whose entries become user properties
    #[arg(long, value_name = "FILE")]
    property_file: Vec<PathBuf>,
}

#[derive(Args)]
struct TargetsArgs {
    #[command(flatten)]
    workspace: WorkspaceArgs,
    /// Reference strings to resolve instead of listing everything
    references: Vec<String>,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct PropertyArgs {
    #[command(flatten)]
    workspace: WorkspaceArgs,
    /// Property name; omit to list every known name
    name: Option<String>,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct TagsArgs {
    #[command(flatten)]
    workspace: WorkspaceArgs,
    /// Classpath entry (jar or class directory) for the base loader
    #[arg(long, value_name = "PATH")]
    lib: Vec<PathBuf>,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct CheckArgs {
    #[command(flatten)]
    workspace: WorkspaceArgs,
    /// Classpath entry (jar or class directory) for the base loader
    #[arg(long, value_name = "PATH")]
    lib: Vec<PathBuf>,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Targets(args) => run_targets(args),
        Command::Property(args) => run_property(args),
        Command::Tags(args) => run_tags(args),
        Command::Check(args) => run_check(args),
    }
}

fn load_workspace(args: &WorkspaceArgs) -> Result<Workspace> {
    let mut options = LoadOptions::default();
    for path in &args.property_file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        for entry in &formica_properties::parse(&text).entries {
            options
                .user_properties
                .insert(entry.key.clone(), entry.value.clone());
        }
    }
    // Command-line definitions win over property files.
    for define in &args.define {
        let Some((name, value)) = define.split_once('=') else {
            bail!("malformed definition {define:?}, expected NAME=VALUE");
        };
        options
            .user_properties
            .insert(name.to_string(), value.to_string());
    }
    let ws = Workspace::load(&LocalFs, &args.build_file, &options)
        .with_context(|| format!("cannot load {}", args.build_file.display()))?;
    tracing::debug!(
        files = ws.build_files().count(),
        diagnostics = ws.diagnostics().len(),
        "workspace loaded"
    );
    Ok(ws)
}

#[derive(Serialize)]
struct TargetListing {
    default: Option<String>,
    targets: Vec<TargetRow>,
}

#[derive(Serialize)]
struct TargetRow {
    effective_name: String,
    raw_name: String,
    location: String,
    depends: Vec<String>,
}

#[derive(Serialize)]
struct ReferenceRow {
    reference: String,
    effective_name: Option<String>,
    location: Option<String>,
}

fn run_targets(args: TargetsArgs) -> Result<i32> {
    let ws = load_workspace(&args.workspace)?;
    let token = CancellationToken::new();

    if args.references.is_empty() {
        let resolution = resolve_targets(&ws, &[], None, &token)?;
        let listing = TargetListing {
            default: default_target(&ws, &token)?.map(|target| target.effective_name),
            targets: resolution
                .targets
                .iter()
                .map(|(name, target)| TargetRow {
                    effective_name: name.to_string(),
                    raw_name: target.raw_name.clone(),
                    location: render_handle(&ws, target.handle),
                    depends: resolution.targets.depends_of(target.handle).to_vec(),
                })
                .collect(),
        };
        if args.json {
            print_json(&listing)?;
        } else {
            if let Some(default) = &listing.default {
                println!("default: {default}");
            }
            for row in &listing.targets {
                println!("{} ({})", row.effective_name, row.location);
                if !row.depends.is_empty() {
                    println!("  depends: {}", row.depends.join(", "));
                }
            }
        }
        return Ok(0);
    }

    let references: Vec<&str> = args.references.iter().map(String::as_str).collect();
    let resolution = resolve_targets(&ws, &references, None, &token)?;
    let mut exit = 0;
    let rows: Vec<ReferenceRow> = references
        .iter()
        .map(|&reference| match resolution.matched.get(reference) {
            Some(resolved) => ReferenceRow {
                reference: reference.to_string(),
                effective_name: Some(resolved.effective_name.clone()),
                location: Some(render_handle(&ws, resolved.handle)),
            },
            None => {
                exit = 1;
                ReferenceRow {
                    reference: reference.to_string(),
                    effective_name: None,
                    location: None,
                }
            }
        })
        .collect();
    if args.json {
        print_json(&rows)?;
    } else {
        for row in &rows {
            match (&row.effective_name, &row.location) {
                (Some(effective), Some(location)) => {
                    println!("{} -> {effective} ({location})", row.reference);
                }
                _ => println!("{}: not found", row.reference),
            }
        }
    }
    Ok(exit)
}

#[derive(Serialize)]
struct PropertyReport {
    name: String,
    value: Option<String>,
    declared_at: Option<String>,
}

fn run_property(args: PropertyArgs) -> Result<i32> {
    let ws = load_workspace(&args.workspace)?;
    let token = CancellationToken::new();

    let Some(name) = args.name else {
        let variants = property_variants(&ws, None, &token)?;
        if args.json {
            print_json(&variants)?;
        } else {
            for name in &variants {
                println!("{name}");
            }
        }
        return Ok(0);
    };

    let lookup = resolve_property(&ws, &name, None, &token)?;
    let report = PropertyReport {
        value: property_value(&ws, &name, None, &token)?,
        declared_at: lookup
            .declaration
            .map(|location| render_location(&ws, location))
            .or_else(|| lookup.provider.map(|handle| render_handle(&ws, handle))),
        name,
    };
    let defined = report.value.is_some() || lookup.provider.is_some();
    if args.json {
        print_json(&report)?;
    } else {
        match &report.value {
            Some(value) => println!("{} = {value}", report.name),
            None if defined => println!("{} is declared without a static value", report.name),
            None => println!("{} is not defined", report.name),
        }
        if let Some(declared_at) = &report.declared_at {
            println!("  declared at {declared_at}");
        }
    }
    Ok(if defined { 0 } else { 1 })
}

#[derive(Serialize)]
struct TagsReport {
    tags: Vec<TagRow>,
    declaration_errors: Vec<DeclarationError>,
}

#[derive(Serialize)]
struct TagRow {
    name: String,
    namespace: Option<String>,
    kind: &'static str,
    class: Option<String>,
    error: Option<String>,
    declared_at: String,
}

#[derive(Serialize)]
struct DeclarationError {
    location: String,
    message: String,
}

fn run_tags(args: TagsArgs) -> Result<i32> {
    let ws = load_workspace(&args.workspace)?;
    let token = CancellationToken::new();
    let registry = CustomTagRegistry::build(&ws, &registry_options(&args.lib), &token)?;

    let report = TagsReport {
        tags: registry
            .tags()
            .map(|entry| {
                let tag = QName::new(entry.key().name.clone(), entry.key().namespace.clone());
                TagRow {
                    name: entry.key().name.clone(),
                    namespace: entry.key().namespace.clone(),
                    kind: kind_label(entry.kind()),
                    class: entry.class_name().map(str::to_owned),
                    error: registry.tag_error(&tag),
                    declared_at: render_handle(&ws, entry.declared_by()),
                }
            })
            .collect(),
        declaration_errors: collect_declaration_errors(&ws, &registry),
    };
    if args.json {
        print_json(&report)?;
    } else {
        for row in &report.tags {
            let qualified = match &row.namespace {
                Some(namespace) => format!("{{{namespace}}}{}", row.name),
                None => row.name.clone(),
            };
            match (&row.class, &row.error) {
                (_, Some(error)) => println!("{qualified} [{}] {error}", row.kind),
                (Some(class), None) => println!("{qualified} [{}] {class}", row.kind),
                (None, None) => println!("{qualified} [{}]", row.kind),
            }
        }
        for error in &report.declaration_errors {
            println!("{}: {}", error.location, error.message);
        }
    }
    Ok(0)
}

#[derive(Serialize)]
struct Finding {
    category: &'static str,
    location: Option<String>,
    message: String,
}

fn run_check(args: CheckArgs) -> Result<i32> {
    let ws = load_workspace(&args.workspace)?;
    let token = CancellationToken::new();
    let mut findings = Vec::new();

    for diagnostic in ws.diagnostics() {
        findings.push(Finding {
            category: "load",
            location: Some(render_location(&ws, diagnostic.location)),
            message: diagnostic.message.clone(),
        });
    }

    for duplicate in duplicate_targets(&ws, &token)? {
        findings.push(Finding {
            category: "duplicate-target",
            location: Some(render_handle(&ws, duplicate.second)),
            message: format!(
                "target {} is already defined at {}",
                duplicate.effective_name,
                render_handle(&ws, duplicate.first)
            ),
        });
    }

    let resolution = resolve_targets(&ws, &[], None, &token)?;
    let mut seen = HashSet::new();
    for (name, target) in resolution.targets.iter() {
        for dep in resolution.targets.depends_of(target.handle) {
            if !resolution.targets.contains(dep) && seen.insert((target.handle, dep.clone())) {
                findings.push(Finding {
                    category: "unknown-dependency",
                    location: Some(render_handle(&ws, target.handle)),
                    message: format!("target {name} depends on unknown target {dep}"),
                });
            }
        }
    }

    let registry = CustomTagRegistry::build(&ws, &registry_options(&args.lib), &token)?;
    for error in collect_declaration_errors(&ws, &registry) {
        findings.push(Finding {
            category: "declaration",
            location: Some(error.location),
            message: error.message,
        });
    }
    for entry in registry.tags() {
        let tag = QName::new(entry.key().name.clone(), entry.key().namespace.clone());
        if let Some(error) = registry.tag_error(&tag) {
            findings.push(Finding {
                category: "tag",
                location: Some(render_handle(&ws, entry.declared_by())),
                message: error,
            });
        }
    }

    let exit = if findings.is_empty() { 0 } else { 1 };
    if args.json {
        print_json(&findings)?;
    } else {
        for finding in &findings {
            match &finding.location {
                Some(location) => println!("{location}: {} [{}]", finding.message, finding.category),
                None => println!("{} [{}]", finding.message, finding.category),
            }
        }
        println!(
            "checked {}: {} finding(s)",
            args.workspace.build_file.display(),
            findings.len()
        );
    }
    Ok(exit)
}

fn registry_options(libs: &[PathBuf]) -> RegistryOptions {
    let entries = libs
        .iter()
        .map(|path| ClasspathEntry::from_path(path.clone()))
        .collect();
    RegistryOptions {
        base_loader: Arc::new(LoaderContext::new(entries)),
    }
}

/// Declaration errors sorted by location; the registry hands them out in
/// map order, which is not stable across runs.
fn collect_declaration_errors(ws: &Workspace, registry: &CustomTagRegistry) -> Vec<DeclarationError> {
    let mut errors: Vec<DeclarationError> = registry
        .declaration_errors()
        .map(|(handle, message)| DeclarationError {
            location: render_handle(ws, handle),
            message: message.to_string(),
        })
        .collect();
    errors.sort_by(|a, b| (&a.location, &a.message).cmp(&(&b.location, &b.message)));
    errors
}

fn kind_label(kind: TagEntryKind) -> &'static str {
    match kind {
        TagEntryKind::Macro => "macro",
        TagEntryKind::MacroElement => "macro element",
        TagEntryKind::Preset => "preset",
        TagEntryKind::Script => "script",
        TagEntryKind::ScriptElement => "script element",
        TagEntryKind::Task => "task",
        TagEntryKind::DataType => "type",
    }
}

fn render_handle(ws: &Workspace, handle: ElementHandle) -> String {
    match ws.build_file(handle.file) {
        Some(file) => render_location(ws, file.location(handle.element)),
        None => String::new(),
    }
}

fn render_location(ws: &Workspace, location: Location) -> String {
    let path = ws.file_path(location.file).unwrap_or_else(|| Path::new("?"));
    match ws.line_col(location) {
        Some(line_col) => format!("{}:{}:{}", path.display(), line_col.line + 1, line_col.col + 1),
        None => path.display().to_string(),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

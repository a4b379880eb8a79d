//! Per-target graph fragments, as exported by the compiler front-end.
//!
//! The front-end writes one or more graph files per target. Each file holds
//! the environment the target compiles in, the tool invocations it needs and
//! the tasks that use them:
//!
//! ```xml
//! <BuildSet FormatVersion="1">
//!   <Environments>
//!     <Environment Name="Default">
//!       <Tools>
//!         <Tool Name="Tool0" Path="cl.exe" Params="/c a.cpp" AllowRemote="true"
//!               OutputFileMasks="a.obj" SkipIfProjectFailed="true"/>
//!       </Tools>
//!       <Variables>
//!         <Variable Name="PATH" Value="C:\VS\bin"/>
//!       </Variables>
//!     </Environment>
//!   </Environments>
//!   <Project Name="Default" Env="Default">
//!     <Task Name="Action0" Tool="Tool0" SourceFile="a.cpp" WorkingDir="C:\Work"
//!           SkipIfProjectFailed="true" DependsOn="Action1;Action2"/>
//!   </Project>
//! </BuildSet>
//! ```
//!
//! Tasks must be listed in dependency order: a task may only depend on tasks
//! that appear before it in the same file. The merge relies on this and does
//! no sorting of its own. [`GraphPart::validate_order`] checks it up front.

use std::collections::{HashMap, HashSet};
use std::fmt::Write;
use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::{debug, info};

use crate::core::TargetSpec;
use crate::error::FragmentError;
use crate::manifest::{Manifest, is_receipt};
use crate::provider::TargetProvider;
use crate::registry::BuildProductRegistry;
use crate::xml::{attributes, parse_bool, write_attr};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub value: String,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A reusable invocation template.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolDef {
    /// Fragment-local name.
    pub name: String,
    pub path: String,
    pub params: String,
    pub allow_remote: bool,
    pub output_file_masks: String,
    pub vc_compiler: Option<String>,
    pub skip_if_project_failed: bool,
    pub auto_reserve_memory: Option<String>,
    pub output_prefix: Option<String>,
}

impl ToolDef {
    pub fn new(name: impl Into<String>, path: impl Into<String>, params: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            params: params.into(),
            ..Default::default()
        }
    }
}

/// One unit of work referencing a tool by its fragment-local name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskDef {
    /// Fragment-local name.
    pub name: String,
    pub tool: String,
    pub source_file: String,
    pub caption: Option<String>,
    pub working_dir: String,
    pub skip_if_project_failed: bool,
    /// Fragment-local names of tasks listed earlier in the same file.
    pub depends_on: Vec<String>,
}

impl TaskDef {
    pub fn new(name: impl Into<String>, tool: impl Into<String>, source_file: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tool: tool.into(),
            source_file: source_file.into(),
            ..Default::default()
        }
    }

    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(names.into_iter().map(Into::into));
        self
    }
}

/// The contents of a single exported graph file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GraphPart {
    pub source: Utf8PathBuf,
    pub variables: Vec<Variable>,
    pub tools: Vec<ToolDef>,
    pub tasks: Vec<TaskDef>,
}

fn required(
    attrs: &mut HashMap<String, String>,
    path: &Utf8Path,
    element: &'static str,
    attribute: &'static str,
) -> Result<String, FragmentError> {
    attrs
        .remove(attribute)
        .ok_or_else(|| FragmentError::MissingAttribute {
            path: path.to_owned(),
            element,
            attribute,
        })
}

fn split_depends(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}

impl GraphPart {
    pub fn read(path: &Utf8Path) -> Result<Self, FragmentError> {
        let text = fs::read_to_string(path).map_err(|source| FragmentError::Io {
            path: path.to_owned(),
            source,
        })?;

        Self::parse(&text, path)
    }

    pub fn parse(text: &str, path: &Utf8Path) -> Result<Self, FragmentError> {
        let xml_err = |source: quick_xml::Error| FragmentError::Xml {
            path: path.to_owned(),
            source,
        };

        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut part = GraphPart {
            source: path.to_owned(),
            ..Default::default()
        };

        loop {
            let element = match reader.read_event().map_err(xml_err)? {
                Event::Start(e) | Event::Empty(e) => e,
                Event::Eof => break,
                _ => continue,
            };

            match element.name().as_ref() {
                b"Variable" => {
                    let mut a = attributes(&element).map_err(xml_err)?;
                    part.variables.push(Variable {
                        name: required(&mut a, path, "Variable", "Name")?,
                        value: required(&mut a, path, "Variable", "Value")?,
                    });
                }
                b"Tool" => {
                    let mut a = attributes(&element).map_err(xml_err)?;
                    part.tools.push(ToolDef {
                        name: required(&mut a, path, "Tool", "Name")?,
                        path: required(&mut a, path, "Tool", "Path")?,
                        params: required(&mut a, path, "Tool", "Params")?,
                        allow_remote: a.remove("AllowRemote").is_some_and(|v| parse_bool(&v)),
                        output_file_masks: a.remove("OutputFileMasks").unwrap_or_default(),
                        vc_compiler: a.remove("VCCompiler"),
                        skip_if_project_failed: a
                            .remove("SkipIfProjectFailed")
                            .is_some_and(|v| parse_bool(&v)),
                        auto_reserve_memory: a.remove("AutoReserveMemory"),
                        output_prefix: a.remove("OutputPrefix"),
                    });
                }
                b"Task" => {
                    let mut a = attributes(&element).map_err(xml_err)?;
                    part.tasks.push(TaskDef {
                        name: required(&mut a, path, "Task", "Name")?,
                        tool: required(&mut a, path, "Task", "Tool")?,
                        source_file: a.remove("SourceFile").unwrap_or_default(),
                        caption: a.remove("Caption"),
                        working_dir: a.remove("WorkingDir").unwrap_or_default(),
                        skip_if_project_failed: a
                            .remove("SkipIfProjectFailed")
                            .is_some_and(|v| parse_bool(&v)),
                        depends_on: a.remove("DependsOn").map(|v| split_depends(&v)).unwrap_or_default(),
                    });
                }
                _ => {}
            }
        }

        Ok(part)
    }

    /// Checks that every dependency names a task listed earlier in the file.
    /// Names that do not exist anywhere are left for the merge to report.
    pub fn validate_order(&self) -> Result<(), FragmentError> {
        let all: HashSet<&str> = self.tasks.iter().map(|t| t.name.as_str()).collect();
        let mut seen = HashSet::new();

        for task in &self.tasks {
            for dep in &task.depends_on {
                if !seen.contains(dep.as_str()) && all.contains(dep.as_str()) {
                    return Err(FragmentError::TaskOrderViolation {
                        path: self.source.clone(),
                        task: task.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            seen.insert(task.name.as_str());
        }

        Ok(())
    }

    /// Renders the part back in the front-end's export format.
    pub fn to_xml(&self) -> String {
        let mut buf = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
        buf.push_str("<BuildSet FormatVersion=\"1\">\n<Environments>\n<Environment Name=\"Default\">\n<Tools>\n");

        for tool in &self.tools {
            buf.push_str("<Tool");
            write_attr(&mut buf, "Name", &tool.name);
            write_attr(&mut buf, "AllowRemote", &tool.allow_remote.to_string());
            if let Some(prefix) = &tool.output_prefix {
                write_attr(&mut buf, "OutputPrefix", prefix);
            }
            write_attr(&mut buf, "Params", &tool.params);
            write_attr(&mut buf, "Path", &tool.path);
            if let Some(vc) = &tool.vc_compiler {
                write_attr(&mut buf, "VCCompiler", vc);
            }
            write_attr(&mut buf, "SkipIfProjectFailed", &tool.skip_if_project_failed.to_string());
            if let Some(mem) = &tool.auto_reserve_memory {
                write_attr(&mut buf, "AutoReserveMemory", mem);
            }
            write_attr(&mut buf, "OutputFileMasks", &tool.output_file_masks);
            buf.push_str("/>\n");
        }

        buf.push_str("</Tools>\n<Variables>\n");
        for var in &self.variables {
            buf.push_str("<Variable");
            write_attr(&mut buf, "Name", &var.name);
            write_attr(&mut buf, "Value", &var.value);
            buf.push_str("/>\n");
        }
        buf.push_str("</Variables>\n</Environment>\n</Environments>\n");

        buf.push_str("<Project Name=\"Default\" Env=\"Default\">\n");
        for task in &self.tasks {
            buf.push_str("<Task");
            write_attr(&mut buf, "SourceFile", &task.source_file);
            if let Some(caption) = &task.caption {
                write_attr(&mut buf, "Caption", caption);
            }
            write_attr(&mut buf, "Name", &task.name);
            write_attr(&mut buf, "Tool", &task.tool);
            write_attr(&mut buf, "WorkingDir", &task.working_dir);
            write_attr(&mut buf, "SkipIfProjectFailed", &task.skip_if_project_failed.to_string());
            if !task.depends_on.is_empty() {
                write_attr(&mut buf, "DependsOn", &task.depends_on.join(";"));
            }
            buf.push_str("/>\n");
        }
        let _ = writeln!(buf, "</Project>\n</BuildSet>");

        buf
    }
}

/// One target's exported build graph plus the products it promises.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub target: TargetSpec,
    /// Reporting caption, e.g. `Game-Win64-Development`.
    pub caption: String,
    /// Graph files in the order they were exported.
    pub parts: Vec<GraphPart>,
    pub manifest: Manifest,
}

impl Fragment {
    pub fn new(target: TargetSpec, parts: Vec<GraphPart>, manifest: Manifest) -> Self {
        Self {
            caption: target.id.to_string(),
            target,
            parts,
            manifest,
        }
    }

    pub fn task_count(&self) -> usize {
        self.parts.iter().map(|p| p.tasks.len()).sum()
    }
}

/// Drives the front-end's export mode and collects the result.
#[derive(Debug, Clone)]
pub struct FragmentLoader {
    pub export_dir: Utf8PathBuf,
    pub graph_pattern: String,
    pub manifest_path: Utf8PathBuf,
    pub log_dir: Utf8PathBuf,
    pub strict_task_order: bool,
}

impl FragmentLoader {
    /// Exports one target and loads its graph files.
    ///
    /// Receipts in the manifest are registered right away. On a clean build,
    /// every other declared product that is not registered yet is deleted.
    /// The export directory is left empty for the next target.
    pub fn load(
        &self,
        provider: &dyn TargetProvider,
        target: &TargetSpec,
        registry: &mut BuildProductRegistry,
        clean: bool,
    ) -> Result<Fragment, FragmentError> {
        let caption = target.id.to_string();

        self.clear_export_dir()?;
        crate::io::remove_file_if_exists(&self.manifest_path).map_err(|source| FragmentError::Io {
            path: self.manifest_path.clone(),
            source,
        })?;

        provider.export(target, &self.manifest_path, &self.export_dir)?;

        if !self.manifest_path.is_file() {
            return Err(FragmentError::ManifestMissing {
                target: target.id.clone(),
                path: self.manifest_path.clone(),
            });
        }

        let saved = crate::io::copy_numbered(&self.manifest_path, &self.log_dir, "Manifest", ".xml")
            .map_err(|source| FragmentError::Io {
                path: self.manifest_path.clone(),
                source,
            })?;
        let manifest = Manifest::read(&saved)?;

        for receipt in manifest.receipts() {
            registry.add(receipt.clone(), &caption)?;
        }

        if clean {
            for product in &manifest.build_products {
                if is_receipt(product) || registry.contains(product) {
                    continue;
                }
                debug!("Deleting stale product {product}");
                crate::io::remove_file_if_exists(product).map_err(|source| FragmentError::Io {
                    path: product.clone(),
                    source,
                })?;
            }
        }

        let mut parts = Vec::new();
        for file in self.exported_files()? {
            let copy = match crate::io::copy_numbered(&file, &self.log_dir, "Export", ".xge.xml") {
                Ok(copy) => copy,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(FragmentError::MissingGraphFile {
                        target: target.id.clone(),
                        path: file,
                    });
                }
                Err(source) => return Err(FragmentError::Io { path: file, source }),
            };

            let part = GraphPart::read(&copy)?;
            if self.strict_task_order {
                part.validate_order()?;
            }
            debug!("Loaded {} ({} tasks) for {caption}", copy, part.tasks.len());
            parts.push(part);
        }

        self.clear_export_dir()?;

        info!("Exported {caption}: {} graph file(s)", parts.len());
        Ok(Fragment::new(target.clone(), parts, manifest))
    }

    fn exported_files(&self) -> Result<Vec<Utf8PathBuf>, FragmentError> {
        let pattern = self.export_dir.join(&self.graph_pattern);
        let mut files = Vec::new();

        for entry in glob::glob(pattern.as_str())? {
            files.push(Utf8PathBuf::try_from(entry?)?);
        }

        files.sort();
        Ok(files)
    }

    fn clear_export_dir(&self) -> Result<(), FragmentError> {
        fs::create_dir_all(&self.export_dir).map_err(|source| FragmentError::Io {
            path: self.export_dir.clone(),
            source,
        })?;

        for file in self.exported_files()? {
            crate::io::remove_file_if_exists(&file)
                .map_err(|source| FragmentError::Io { path: file, source })?;
        }

        Ok(())
    }
}

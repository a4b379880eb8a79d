use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::error::EmitError;
use crate::graph::UnifiedGraph;
use crate::xml::write_attr;

#[derive(Debug, Clone, Copy, Default)]
pub struct EmitOptions {
    /// Makes the engine report progress once per tool.
    pub show_progress: bool,
}

/// Directory of a resource compiler output named by `/fo "<path>"`.
/// Either separator is accepted whatever the host.
fn resource_output_dir(params: &str) -> Option<Utf8PathBuf> {
    const START: &str = "/fo \"";

    let start = params.find(START)? + START.len();
    let len = params[start..].find('"').filter(|&n| n > 0)?;
    let file = &params[start..start + len];
    let dir = &file[..file.rfind(['\\', '/'])?];
    (!dir.is_empty()).then(|| Utf8PathBuf::from(dir))
}

impl UnifiedGraph {
    /// Renders the descriptor handed to the distributed engine.
    pub fn render(&self, options: &EmitOptions) -> String {
        let total = self.index.tools().len();
        let mut buf = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
        buf.push_str("<BuildSet FormatVersion=\"1\">\n  <Environments>\n");

        for env in self.index.environment_ids() {
            let environment = self.index.environment(env);

            buf.push_str("    <Environment");
            write_attr(&mut buf, "Name", &environment.name);
            buf.push_str(">\n      <Tools>\n");

            for tool in self.index.tools_in(env) {
                let def = &tool.def;
                let prefix = match (&def.output_prefix, options.show_progress) {
                    (Some(prefix), true) => Some(format!("{prefix} [@progress increment 1/{total}]")),
                    (None, true) => Some(format!(" [@progress increment 1/{total} skipline]")),
                    (prefix, false) => prefix.clone(),
                };

                buf.push_str("        <Tool");
                write_attr(&mut buf, "Name", &tool.name);
                write_attr(&mut buf, "AllowRemote", &def.allow_remote.to_string());
                if let Some(prefix) = &prefix {
                    write_attr(&mut buf, "OutputPrefix", prefix);
                }
                write_attr(&mut buf, "GroupPrefix", &tool.group_prefix());
                write_attr(&mut buf, "Params", &def.params);
                write_attr(&mut buf, "Path", &def.path);
                if let Some(vc) = &def.vc_compiler {
                    write_attr(&mut buf, "VCCompiler", vc);
                }
                write_attr(&mut buf, "SkipIfProjectFailed", &def.skip_if_project_failed.to_string());
                if let Some(mem) = &def.auto_reserve_memory {
                    write_attr(&mut buf, "AutoReserveMemory", mem);
                }
                write_attr(&mut buf, "OutputFileMasks", &def.output_file_masks);
                buf.push_str("/>\n");
            }

            buf.push_str("      </Tools>\n      <Variables>\n");
            for var in &environment.variables {
                buf.push_str("        <Variable");
                write_attr(&mut buf, "Name", &var.name);
                write_attr(&mut buf, "Value", &var.value);
                buf.push_str("/>\n");
            }
            buf.push_str("      </Variables>\n    </Environment>\n");
        }
        buf.push_str("  </Environments>\n");

        for env in self.index.environment_ids() {
            let name = &self.index.environment(env).name;

            buf.push_str("  <Project");
            write_attr(&mut buf, "Name", name);
            write_attr(&mut buf, "Env", name);
            buf.push_str(">\n");

            for (index, task) in self.tasks_in(env) {
                buf.push_str("    <Task");
                write_attr(&mut buf, "SourceFile", &task.source_file);
                if let Some(caption) = &task.caption {
                    write_attr(&mut buf, "Caption", caption);
                }
                write_attr(&mut buf, "Name", &task.name);
                write_attr(&mut buf, "Tool", &self.index.tool(task.tool).name);
                write_attr(&mut buf, "WorkingDir", &task.working_dir);
                write_attr(&mut buf, "SkipIfProjectFailed", &task.skip_if_project_failed.to_string());

                let deps = self.dependencies(index);
                if !deps.is_empty() {
                    write_attr(&mut buf, "DependsOn", &deps.join(";"));
                }
                buf.push_str("/>\n");
            }

            buf.push_str("  </Project>\n");
        }

        buf.push_str("</BuildSet>\n");
        buf
    }

    /// Writes the descriptor to `path` and prepares the workspace for the
    /// engine: merged graph files are copied next to it as
    /// `<path>.<file name>` and resource output directories are created.
    pub fn write_descriptor(&self, path: &Utf8Path, options: &EmitOptions) -> Result<(), EmitError> {
        if self.is_empty() {
            return Err(EmitError::EmptyGraph);
        }

        let fail = |path: &Utf8Path| {
            let path = path.to_owned();
            move |source| EmitError::Serialization { path, source }
        };

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(fail(dir))?;
        }
        fs::write(path, self.render(options)).map_err(fail(path))?;

        for source in &self.sources {
            let Some(name) = source.file_name() else {
                continue;
            };
            let copy = Utf8PathBuf::from(format!("{path}.{name}"));
            fs::copy(source, &copy).map_err(fail(copy.as_path()))?;
        }

        for tool in self.index.tools() {
            if let Some(dir) = resource_output_dir(&tool.def.params) {
                if !dir.exists() {
                    debug!("Creating resource output directory {dir}");
                    fs::create_dir_all(&dir).map_err(fail(dir.as_path()))?;
                }
            }
        }

        debug!(
            "Wrote {path}: {} environment(s), {} tool(s), {} task(s)",
            self.stats.environments, self.stats.tools, self.stats.tasks
        );
        Ok(())
    }
}

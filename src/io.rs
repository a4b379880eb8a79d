use std::fmt::Display;
use std::fs;
use std::io;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use console::Style;
use indicatif::ProgressStyle;

const ANSI_BLUE: Style = Style::new().blue();

pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

pub(crate) fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

pub(crate) fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} [{elapsed}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Returns the first `dir/<stem>.<n><suffix>` that does not exist yet,
/// counting up from zero. Diagnostics copies never overwrite each other.
pub(crate) fn unique_path(dir: &Utf8Path, stem: &str, suffix: &str) -> Utf8PathBuf {
    let mut n = 0usize;

    loop {
        let candidate = dir.join(format!("{stem}.{n}{suffix}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Copies `src` into `dir` under a fresh numbered name and returns the copy.
pub(crate) fn copy_numbered(
    src: &Utf8Path,
    dir: &Utf8Path,
    stem: &str,
    suffix: &str,
) -> io::Result<Utf8PathBuf> {
    fs::create_dir_all(dir)?;
    let dst = unique_path(dir, stem, suffix);
    fs::copy(src, &dst)?;
    Ok(dst)
}

/// Deletes a file, treating "already gone" as success.
pub(crate) fn remove_file_if_exists(path: &Utf8Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

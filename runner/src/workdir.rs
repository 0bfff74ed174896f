use std::ffi::OsStr;
use std::io::{self, BufRead, Write};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkdirError {
    #[error("refusing to delete {0:?}: only directories under /tmp/ are removed")]
    OutsideTmp(PathBuf),

    #[error("not deleting {0:?}")]
    Declined(PathBuf),

    #[error("working directory I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Whether `path` is somewhere below `/tmp/` (and not `/tmp` itself).
pub fn is_disposable(path: &Path) -> bool {
    let mut components = path.components();
    if components.next() != Some(Component::RootDir) {
        return false;
    }
    if components.next() != Some(Component::Normal(OsStr::new("tmp"))) {
        return false;
    }
    let rest: Vec<Component> = components.collect();
    !rest.is_empty() && rest.iter().all(|c| matches!(c, Component::Normal(_)))
}

/// Asks `question` until the answer is yes or no. End of input counts as no.
pub fn confirm<R: BufRead, W: Write>(
    question: &str,
    input: &mut R,
    output: &mut W,
) -> io::Result<bool> {
    loop {
        write!(output, "{} [y/n] ", question)?;
        output.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(false);
        }
        match line.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => writeln!(output, "please answer y or n")?,
        }
    }
}

/// Removes a previous run's working directory. Returns whether anything was
/// deleted.
pub fn clear<R: BufRead, W: Write>(
    path: &Path,
    assume_yes: bool,
    input: &mut R,
    output: &mut W,
) -> Result<bool, WorkdirError> {
    if !path.exists() {
        return Ok(false);
    }
    if !is_disposable(path) {
        return Err(WorkdirError::OutsideTmp(path.to_path_buf()));
    }
    let question = format!("Delete {}?", path.display());
    if !assume_yes && !confirm(&question, input, output)? {
        return Err(WorkdirError::Declined(path.to_path_buf()));
    }
    std::fs::remove_dir_all(path)?;
    Ok(true)
}

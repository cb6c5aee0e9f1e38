//! C8: Atomic File Splicer.
//!
//! Replaces a single delimited, named section of a text file without
//! disturbing anything else a human may have written into it. Used by C9 to
//! install the `known_hosts` CA trust line and the `ssh_config` block the
//! server returns, per design doc §4.8.
//!
//! The write-then-rename idiom here mirrors the teacher's `FlatFileFs::write`
//! (`app-rs/src/ffs.rs`): write the new content to a sibling path on the same
//! filesystem, then `fs::rename` it over the target so a crash or a failed
//! write never leaves a half-written file in place.

use std::{fs, io, path::Path};

/// Whether [`replace_section`] actually changed the file on disk.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Changed {
    Changed,
    Unchanged,
}

/// `ReplaceSection(path, sectionName, newLines, mode) → Changed?`, design
/// doc §4.8's 7-step algorithm:
///
/// 1. Read the existing file (a missing file is treated as empty).
/// 2. Remove everything between the begin/end markers for `section_name`,
///    markers included.
/// 3. Strip trailing blank lines from what's left.
/// 4. If `new_lines` is non-empty, append a blank line, the begin marker,
///    `new_lines`, and the end marker.
/// 5. Ensure the result ends with exactly one newline.
/// 6. If that equals the original bytes, do nothing.
/// 7. Otherwise write to `<path>.tmpfornew` with `mode`, then rename over
///    `path`.
pub fn replace_section(
    path: &Path,
    section_name: &str,
    new_lines: &[String],
    mode: u32,
) -> io::Result<Changed> {
    let original = read_or_empty(path)?;

    let rendered = render(&original, section_name, new_lines);

    if rendered.as_bytes() == original.as_slice() {
        return Ok(Changed::Unchanged);
    }

    write_atomic(path, rendered.as_bytes(), mode)?;
    Ok(Changed::Changed)
}

fn read_or_empty(path: &Path) -> io::Result<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

fn begin_marker(section_name: &str) -> String {
    format!("# AUTOGENERATED:BEGIN:{section_name} - DO NOT EDIT BETWEEN MARKERS!")
}

fn end_marker(section_name: &str) -> String {
    format!("# AUTOGENERATED:END:{section_name} - DO NOT EDIT BETWEEN MARKERS!")
}

/// Pure rendering step (steps 2-5), split out so it's trivially unit
/// testable without touching the filesystem.
fn render(original: &[u8], section_name: &str, new_lines: &[String]) -> String {
    let begin = begin_marker(section_name);
    let end = end_marker(section_name);

    let original_str = String::from_utf8_lossy(original);

    let mut retained: Vec<&str> = Vec::new();
    let mut in_section = false;
    for line in original_str.lines() {
        if !in_section && line == begin {
            in_section = true;
            continue;
        }
        if in_section {
            if line == end {
                in_section = false;
            }
            continue;
        }
        retained.push(line);
    }

    // Step 3: strip trailing blank lines from the retained portion.
    while matches!(retained.last(), Some(&"")) {
        retained.pop();
    }

    let mut out_lines: Vec<&str> = retained;
    if !new_lines.is_empty() {
        out_lines.push("");
        out_lines.push(&begin);
        for line in new_lines {
            out_lines.push(line.as_str());
        }
        out_lines.push(&end);
    }

    if out_lines.is_empty() {
        return String::new();
    }

    let mut rendered = out_lines.join("\n");
    rendered.push('\n');
    rendered
}

#[cfg(unix)]
fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let tmp_path = tmp_path_for(path);
    fs::write(&tmp_path, contents)?;
    fs::set_permissions(&tmp_path, fs::Permissions::from_mode(mode))?;
    fs::rename(&tmp_path, path)
}

#[cfg(not(unix))]
fn write_atomic(path: &Path, contents: &[u8], _mode: u32) -> io::Result<()> {
    let tmp_path = tmp_path_for(path);
    fs::write(&tmp_path, contents)?;
    fs::rename(&tmp_path, path)
}

fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let mut os_string = path.as_os_str().to_owned();
    os_string.push(".tmpfornew");
    std::path::PathBuf::from(os_string)
}

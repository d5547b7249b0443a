//! For `trydata`s tests only
//!
//! A tiny checker for annotated assignments:
//! ```text
//! s: str = 42;  i: int = 'foo'
//! reveal_type(1.5)
//! ```
//! Files named on the command line are checked first, then every other file under the current
//! directory in path order. A `crash()` statement exits without diagnostics, `sleep(<secs>)`
//! stalls.

use std::env;
use std::error::Error;
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;

fn literal_type(expr: &str) -> Option<&'static str> {
    let expr = expr.trim();
    if expr.parse::<i64>().is_ok() {
        Some("int")
    } else if expr.parse::<f64>().is_ok() {
        Some("float")
    } else if expr == "True" || expr == "False" {
        Some("bool")
    } else if expr.len() >= 2
        && ((expr.starts_with('\'') && expr.ends_with('\''))
            || (expr.starts_with('"') && expr.ends_with('"')))
    {
        Some("str")
    } else {
        None
    }
}

/// Drop a trailing `#` comment, ignoring `#` inside string literals
fn strip_comment(line: &str) -> &str {
    let mut quote = None;
    for (i, c) in line.char_indices() {
        match (quote, c) {
            (None, '#') => return &line[..i],
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), c) if q == c => quote = None,
            _ => {}
        }
    }
    line
}

fn check_statement(statement: &str) -> Result<Option<(&'static str, String)>, Box<dyn Error>> {
    let statement = statement.trim();
    if statement == "crash()" {
        return Err("Traceback (most recent call last):\nRuntimeError: crash() requested".into());
    }
    if let Some(secs) = statement
        .strip_prefix("sleep(")
        .and_then(|s| s.strip_suffix(')'))
    {
        std::thread::sleep(std::time::Duration::from_secs(secs.trim().parse()?));
        return Ok(None);
    }
    if let Some(expr) = statement
        .strip_prefix("reveal_type(")
        .and_then(|s| s.strip_suffix(')'))
    {
        let revealed = literal_type(expr).unwrap_or("Any");
        return Ok(Some((
            "note",
            format!("Revealed type is \"builtins.{revealed}\""),
        )));
    }

    let Some((target, expr)) = statement.split_once('=') else {
        return Ok(None);
    };
    let Some((_, declared)) = target.split_once(':') else {
        return Ok(None);
    };
    let declared = declared.trim();
    match literal_type(expr) {
        Some(actual) if actual != declared && declared != "object" => Ok(Some((
            "error",
            format!(
                "Incompatible types in assignment (expression has type \"{actual}\", variable has type \"{declared}\")"
            ),
        ))),
        _ => Ok(None),
    }
}

fn check_file(name: &str, path: &Path, out: &mut impl Write) -> Result<usize, Box<dyn Error>> {
    let text = std::fs::read_to_string(path)?;
    let mut found = 0;
    for (i, line) in text.lines().enumerate() {
        for statement in strip_comment(line).split(';') {
            if let Some((severity, message)) = check_statement(statement)? {
                writeln!(out, "{}:{}: {}: {}", name, i + 1, severity, message)?;
                found += 1;
            }
        }
    }
    Ok(found)
}

fn collect(root: &Path, dir: &Path, files: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect(root, &path, files)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            files.push(rel.to_owned());
        }
    }
    Ok(())
}

fn run() -> Result<i32, Box<dyn Error>> {
    let root = env::current_dir()?;
    let mut files: Vec<PathBuf> = env::args_os().skip(1).map(PathBuf::from).collect();
    let mut rest = Vec::new();
    collect(&root, &root, &mut rest)?;
    rest.sort();
    for path in rest {
        if !files.contains(&path) {
            files.push(path);
        }
    }

    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    let mut found = 0;
    for file in &files {
        let name = file.to_string_lossy().replace('\\', "/");
        found += check_file(&name, &root.join(file), &mut stdout)?;
    }

    if found == 0 {
        Ok(0)
    } else {
        writeln!(stdout, "Found {found} errors in {} files", files.len())?;
        Ok(1)
    }
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(ref e) => {
            writeln!(&mut io::stderr(), "{e}").expect("writing to stderr won't fail");
            2
        }
    };
    process::exit(code);
}

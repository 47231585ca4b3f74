//! Binary format detection.
//!
//! Decides from file inspection alone whether a target server is a native
//! executable (run it directly) or a script (run it through an interpreter).

use std::io::Read;
use std::path::{Path, PathBuf};

/// Number of header bytes inspected.
const HEADER_LEN: usize = 16;

/// Native executable container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeFormat {
    MachO,
    Elf,
    Pe,
    Coff,
}

/// Result of inspecting a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    NativeExecutable(NativeFormat),
    Script,
    NotExecutable,
    Missing,
}

impl Classification {
    pub fn is_native(&self) -> bool {
        matches!(self, Classification::NativeExecutable(_))
    }
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Native(NativeFormat),
    Script,
}

const MAGIC: &[(&[u8], Kind)] = &[
    (&[0xcf, 0xfa, 0xed, 0xfe], Kind::Native(NativeFormat::MachO)),
    (&[0xce, 0xfa, 0xed, 0xfe], Kind::Native(NativeFormat::MachO)),
    (&[0xfe, 0xed, 0xfa, 0xcf], Kind::Native(NativeFormat::MachO)),
    (&[0xfe, 0xed, 0xfa, 0xce], Kind::Native(NativeFormat::MachO)),
    (&[0x7f, 0x45, 0x4c, 0x46], Kind::Native(NativeFormat::Elf)),
    // MZ alone is accepted; the embedded PE header offset is not validated.
    (&[0x4d, 0x5a], Kind::Native(NativeFormat::Pe)),
    (&[0x4c, 0x01], Kind::Native(NativeFormat::Coff)),
    (&[0x64, 0x86], Kind::Native(NativeFormat::Coff)),
    (&[0xc4, 0x01], Kind::Native(NativeFormat::Coff)),
    (&[0x23, 0x21], Kind::Script),
];

/// Classify the first bytes of a file. Longest matching prefix wins.
pub fn classify_header(header: &[u8]) -> Classification {
    let best = MAGIC
        .iter()
        .filter(|(magic, _)| header.starts_with(magic))
        .max_by_key(|(magic, _)| magic.len());

    match best {
        Some((_, Kind::Native(format))) => Classification::NativeExecutable(*format),
        Some((_, Kind::Script)) => Classification::Script,
        None => Classification::NotExecutable,
    }
}

/// Inspect `path` on disk.
///
/// A `#!` script is a `Script` whether or not its execute bit is set, since
/// it always runs through its interpreter. Native formats additionally
/// need the execute permission.
pub fn classify(path: &Path) -> Classification {
    let meta = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return Classification::Missing,
    };
    if !meta.is_file() {
        return Classification::NotExecutable;
    }

    let header = match read_header(path) {
        Ok(header) => header,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "failed to read header");
            return Classification::NotExecutable;
        }
    };
    match classify_header(&header) {
        Classification::NativeExecutable(_) if !is_executable(&meta) => {
            Classification::NotExecutable
        }
        other => other,
    }
}

fn read_header(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = std::fs::File::open(path)?;
    let mut header = Vec::with_capacity(HEADER_LEN);
    file.take(HEADER_LEN as u64).read_to_end(&mut header)?;
    Ok(header)
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Invocation strategy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The concrete program + argv used to start a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub classification: Classification,
}

impl Invocation {
    /// Decide how to start `command` with `args`.
    ///
    /// - native executables run directly;
    /// - scripts run through their shebang interpreter, or `interpreter`
    ///   when the shebang can't be parsed;
    /// - existing files that are not directly runnable go through
    ///   `interpreter` with the path as first argument;
    /// - anything not on disk is handed to the OS verbatim (`PATH` lookup).
    pub fn resolve(command: &str, args: &[String], interpreter: &str) -> Self {
        let path = PathBuf::from(command);
        let classification = classify(&path);

        let (program, mut argv) = match classification {
            Classification::NativeExecutable(_) | Classification::Missing => {
                (command.to_owned(), Vec::new())
            }
            Classification::Script => match read_shebang(&path) {
                Some((program, mut interp_args)) => {
                    interp_args.push(command.to_owned());
                    (program, interp_args)
                }
                None => (interpreter.to_owned(), vec![command.to_owned()]),
            },
            Classification::NotExecutable => (interpreter.to_owned(), vec![command.to_owned()]),
        };
        argv.extend(args.iter().cloned());

        Self {
            program,
            args: argv,
            classification,
        }
    }

    /// Human-readable command line for logs and errors.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Parse `#!/path/to/interp [args]` from the first line of a script.
fn read_shebang(path: &Path) -> Option<(String, Vec<String>)> {
    let file = std::fs::File::open(path).ok()?;
    let mut first = Vec::new();
    file.take(256).read_to_end(&mut first).ok()?;
    let line = first.split(|b| *b == b'\n').next()?;
    let line = std::str::from_utf8(line).ok()?;
    let rest = line.strip_prefix("#!")?.trim();

    let mut parts = rest.split_whitespace().map(str::to_owned);
    let program = parts.next()?;
    Some((program, parts.collect()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

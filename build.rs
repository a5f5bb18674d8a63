use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Directories holding the crate's own Rust sources.
const SOURCE_DIRS: [&str; 4] = ["zoib", "cli", "tests", "benches"];

/// A source lint: a line regex plus a predicate that decides whether a
/// matching line is really a violation.
struct Lint {
    name: &'static str,
    pattern: &'static str,
    accept: fn(&str) -> bool,
    advice: &'static str,
}

const LINTS: [Lint; 4] = [
    Lint {
        name: "underscore-prefixed bindings",
        pattern: r"\b(_[a-zA-Z0-9_]+)\b",
        accept: is_code_binding,
        advice: "Either use the binding (removing the underscore) or remove it completely.",
    },
    Lint {
        name: "#[allow(dead_code)] attributes",
        pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        accept: always,
        advice: "Either use the code or remove it completely.",
    },
    Lint {
        name: "'**' in plain comments",
        pattern: r"(//|/\*).*\*\*",
        accept: is_plain_comment,
        advice: "Bold markers belong in doc comments only.",
    },
    Lint {
        name: "shouting comments",
        pattern: r"(//|/\*).*",
        accept: is_shouting_comment,
        advice: "Comments whose letters are all uppercase are not allowed.",
    },
];

struct LineCollector {
    accept: fn(&str) -> bool,
    violations: Vec<String>,
}

impl Sink for LineCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if (self.accept)(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn always(_: &str) -> bool {
    true
}

fn comment_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    for prefix in ["///", "//!", "//"] {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return Some(rest.trim());
        }
    }
    let start = line.find("/*")? + 2;
    let rest = &line[start..];
    Some(rest.find("*/").map_or(rest, |end| &rest[..end]).trim())
}

fn is_doc_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("///") || trimmed.starts_with("//!")
}

fn is_plain_comment(line: &str) -> bool {
    !is_doc_comment(line)
}

fn is_shouting_comment(line: &str) -> bool {
    let Some(text) = comment_text(line) else {
        return false;
    };
    let mut letters = text.chars().filter(|c| c.is_alphabetic()).peekable();
    letters.peek().is_some() && letters.all(char::is_uppercase)
}

/// Skips comments and identifiers that only appear inside string literals.
fn is_code_binding(line: &str) -> bool {
    if line.trim_start().starts_with("//") || line.contains("/*") {
        return false;
    }
    !line
        .split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 1 && part.contains('_'))
}

fn rust_sources() -> Vec<PathBuf> {
    SOURCE_DIRS
        .iter()
        .filter(|dir| Path::new(dir).is_dir())
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

fn run_lint(lint: &Lint, sources: &[PathBuf]) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(lint.pattern)?;
    let mut searcher = Searcher::new();
    for path in sources {
        let mut collector = LineCollector {
            accept: lint.accept,
            violations: Vec::new(),
        };
        searcher.search_path(&matcher, path, &mut collector)?;
        if !collector.violations.is_empty() {
            let mut message = format!(
                "\n❌ ERROR: Found {} {} in {}:\n",
                collector.violations.len(),
                lint.name,
                path.display()
            );
            for violation in &collector.violations {
                message.push_str(&format!("   {violation}\n"));
            }
            message.push_str(&format!("\n⚠️ {}\n", lint.advice));
            return Err(message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    let sources = rust_sources();
    for lint in &LINTS {
        if let Err(e) = run_lint(lint, &sources) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

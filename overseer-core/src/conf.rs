use crate::catalog::Catalog;
use crate::program::{ProgramDefinition, RESERVED_KEYS};

use std::collections::BTreeMap;
use std::fmt::Write as _;
use thiserror::Error;

const PROGRAM_SECTION_PREFIX: &str = "program:";

#[derive(Debug, Error)]
pub enum ConfError {
    #[error("line {0}: entry outside of any section")]
    EntryOutsideSection(usize),

    #[error("line {0}: expected 'key = value'")]
    InvalidLine(usize),

    #[error("program '{0}': missing required 'command' option")]
    MissingCommand(String),

    #[error("program '{program}': invalid value '{value}' for '{key}'")]
    InvalidValue {
        program: String,
        key: String,
        value: String,
    },

    #[error("program '{0}' is not defined in the catalog")]
    UnknownProgram(String),
}

/// Parse a conf text blob into a [`Catalog`]. Only `[program:<name>]` sections
/// are considered; other sections are passed over so a full supervisor conf can
/// be fed in unmodified. `process_name` is a generated field and is dropped on
/// input.
pub fn parse_conf(text: &str) -> Result<Catalog, ConfError> {
    let mut catalog = Catalog::new();
    let mut current: Option<(String, BTreeMap<String, String>)> = None;
    let mut in_foreign_section = false;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if let Some(section) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            if let Some((name, options)) = current.take() {
                catalog.upsert(name.clone(), build_definition(&name, options)?);
            }
            match section.strip_prefix(PROGRAM_SECTION_PREFIX) {
                Some(name) => {
                    current = Some((name.to_owned(), BTreeMap::new()));
                    in_foreign_section = false;
                }
                None => in_foreign_section = true,
            }
            continue;
        }

        let (key, value) = line
            .split_once('=')
            .ok_or(ConfError::InvalidLine(line_no))?;
        match current.as_mut() {
            Some((_, options)) => {
                options.insert(key.trim().to_owned(), value.trim().to_owned());
            }
            None if in_foreign_section => {}
            None => return Err(ConfError::EntryOutsideSection(line_no)),
        }
    }

    if let Some((name, options)) = current.take() {
        catalog.upsert(name.clone(), build_definition(&name, options)?);
    }

    Ok(catalog)
}

fn build_definition(
    name: &str,
    mut options: BTreeMap<String, String>,
) -> Result<ProgramDefinition, ConfError> {
    let command = options
        .remove("command")
        .ok_or_else(|| ConfError::MissingCommand(name.to_owned()))?;
    options.remove("process_name");

    let numprocs = match options.remove("numprocs") {
        Some(raw) => raw.parse::<u32>().map_err(|_| ConfError::InvalidValue {
            program: name.to_owned(),
            key: "numprocs".to_owned(),
            value: raw,
        })?,
        None => 1,
    };
    let weight = match options.remove("weight") {
        Some(raw) => {
            let parsed = raw.parse::<f64>().ok().filter(|w| *w > 0.0);
            parsed.ok_or_else(|| ConfError::InvalidValue {
                program: name.to_owned(),
                key: "weight".to_owned(),
                value: raw,
            })?
        }
        None => 1.0,
    };

    Ok(ProgramDefinition {
        command,
        numprocs,
        weight,
        extra_options: options,
    })
}

/// Serialize a catalog into the store-facing conf rendition. Reserved keys are
/// kept so placement bookkeeping survives the round trip.
pub fn serialize_conf(catalog: &Catalog) -> String {
    let mut out = String::new();
    for (name, def) in catalog.iter() {
        let _ = writeln!(out, "[{}{}]", PROGRAM_SECTION_PREFIX, name);
        let _ = writeln!(out, "command = {}", def.command);
        if def.numprocs != 1 {
            let _ = writeln!(out, "numprocs = {}", def.numprocs);
        }
        if def.weight != 1.0 {
            let _ = writeln!(out, "weight = {}", def.weight);
        }
        for (key, value) in &def.extra_options {
            let _ = writeln!(out, "{} = {}", key, value);
        }
        let _ = writeln!(out);
    }
    out
}

/// Render a node's live assignment into the supervisor-facing conf rendition:
/// reserved keys stripped, `process_name` generated, `numprocs` taken from the
/// live per-node count rather than the declared default.
pub fn render_supervisor_conf(
    assignment: &BTreeMap<String, u32>,
    catalog: &Catalog,
) -> Result<String, ConfError> {
    let mut out = String::new();
    for (name, count) in assignment {
        let def = catalog
            .get(name)
            .ok_or_else(|| ConfError::UnknownProgram(name.clone()))?;

        let _ = writeln!(out, "[{}{}]", PROGRAM_SECTION_PREFIX, name);
        let _ = writeln!(out, "command = {}", def.command);
        let _ = writeln!(out, "process_name = {}", build_process_name(*count));
        if *count > 1 {
            let _ = writeln!(out, "numprocs = {}", count);
        }
        for (key, value) in &def.extra_options {
            if !RESERVED_KEYS.contains(&key.as_str()) {
                let _ = writeln!(out, "{} = {}", key, value);
            }
        }
        let _ = writeln!(out);
    }
    Ok(out)
}

fn build_process_name(count: u32) -> String {
    if count > 1 {
        "%(program_name)s_%(process_num)02d".to_owned()
    } else {
        "%(program_name)s".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CONF: &str = "\
[program:crawler]
command = python crawl.py
numprocs = 4
weight = 2.5
autorestart = true

; comment line
[program:indexer]
command = ./indexer --fast
";

    #[test]
    fn test_parse_program_sections() {
        let catalog = parse_conf(SAMPLE_CONF).unwrap();

        let crawler = catalog.get("crawler").unwrap();
        assert_eq!(crawler.command, "python crawl.py");
        assert_eq!(crawler.numprocs, 4);
        assert_eq!(crawler.weight, 2.5);
        assert_eq!(
            crawler.extra_options.get("autorestart"),
            Some(&"true".to_string())
        );

        let indexer = catalog.get("indexer").unwrap();
        assert_eq!(indexer.numprocs, 1);
        assert_eq!(indexer.weight, 1.0);
    }

    #[test]
    fn test_parse_skips_foreign_sections() {
        let text = "\
[supervisord]
logfile = /var/log/supervisord.log

[program:only]
command = run
";
        let catalog = parse_conf(text).unwrap();
        assert!(catalog.contains("only"));
        assert!(!catalog.contains("supervisord"));
    }

    #[test]
    fn test_parse_rejects_missing_command() {
        let text = "[program:broken]\nnumprocs = 2\n";
        assert!(matches!(
            parse_conf(text),
            Err(ConfError::MissingCommand(name)) if name == "broken"
        ));
    }

    #[test]
    fn test_parse_rejects_bad_weight() {
        let text = "[program:broken]\ncommand = run\nweight = -1\n";
        assert!(matches!(
            parse_conf(text),
            Err(ConfError::InvalidValue { key, .. }) if key == "weight"
        ));
    }

    /// Store-facing round trip keeps weight and all passthrough options.
    #[test]
    fn test_store_round_trip() {
        let catalog = parse_conf(SAMPLE_CONF).unwrap();
        let reparsed = parse_conf(&serialize_conf(&catalog)).unwrap();
        assert_eq!(catalog, reparsed);
    }

    /// The supervisor rendition strips reserved keys and uses the live count.
    #[test]
    fn test_supervisor_rendition() {
        let catalog = parse_conf(SAMPLE_CONF).unwrap();
        let mut assignment = BTreeMap::new();
        assignment.insert("crawler".to_string(), 3u32);
        assignment.insert("indexer".to_string(), 1u32);

        let text = render_supervisor_conf(&assignment, &catalog).unwrap();
        assert!(text.contains("[program:crawler]"));
        assert!(text.contains("numprocs = 3"));
        assert!(text.contains("process_name = %(program_name)s_%(process_num)02d"));
        assert!(text.contains("autorestart = true"));
        assert!(!text.contains("weight"));

        // Single-instance programs get the bare template and no numprocs line.
        let indexer_block = text.split("[program:indexer]").nth(1).unwrap();
        assert!(indexer_block.contains("process_name = %(program_name)s\n"));
        assert!(!indexer_block.contains("numprocs"));
    }

    #[test]
    fn test_supervisor_rendition_unknown_program() {
        let catalog = Catalog::new();
        let mut assignment = BTreeMap::new();
        assignment.insert("ghost".to_string(), 1u32);
        assert!(matches!(
            render_supervisor_conf(&assignment, &catalog),
            Err(ConfError::UnknownProgram(name)) if name == "ghost"
        ));
    }
}

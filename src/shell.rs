//! Line-oriented interactive front end.
//!
//! Each input line is one command. Paths are taken relative to the current
//! directory and handed to the sandbox resolver, so every confinement rule
//! applies no matter how the shell joins them. Errors are printed and the
//! session carries on.

use crate::archive::Archiver;
use crate::db::{MetadataDb, NewFileRecord};
use crate::sandbox::Sandbox;
use crate::security::ResolvedPath;
use crate::structured::{self, XmlDocument};
use anyhow::{bail, Context, Result};
use std::io::{self, BufRead, Write};
use tracing::warn;

const HELP: &str = "\
Navigation
  pwd                      show the current directory
  cd <dir>                 change directory ('..' goes up, '/' is the sandbox root)
  ls [dir]                 list a directory
  mkdir <dir>              create a directory (parents included)
Files
  cat <file>               print a text file
  write <file> <text>      create or overwrite a file
  append <file> <text>     add a line to the end of a file
  edit <file> <n> <text>   replace line n
  delline <file> <n>       delete line n
  rm <file>                delete a file
  cp <src> <dst>           copy a file
  mv <src> <dst>           move or rename a file
Data
  json-read <file>         print a JSON document
  json-write <file> <json> validate and store a JSON document
  xml-read <file>          print the content of an XML document
  xml-write <file> <text>  store text as an XML document
Archives
  zip <src> <archive>      pack a file or directory
  unzip <archive> <dir>    unpack an archive
Other
  files                    list files you have written
  disk                     show space on the sandbox's filesystem
  help                     show this help
  exit                     leave the shell";

/// Whether the loop should keep reading commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Shell<'a> {
    sandbox: &'a Sandbox,
    db: Option<&'a MetadataDb>,
    owner: String,
    /// Current directory relative to the sandbox root, "." at the root
    cwd: String,
}

impl<'a> Shell<'a> {
    pub fn new(sandbox: &'a Sandbox, owner: impl Into<String>) -> Self {
        Self {
            sandbox,
            db: None,
            owner: owner.into(),
            cwd: ".".to_string(),
        }
    }

    /// Record metadata for written files in `db`
    pub fn with_metadata(mut self, db: &'a MetadataDb) -> Self {
        self.db = Some(db);
        self
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    /// Read and execute commands until `exit` or end of input
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, output: &mut W) -> io::Result<()> {
        writeln!(output, "Welcome to securefm. Type 'help' for a list of commands.")?;

        let mut lines = input.lines();
        loop {
            write!(output, "{}> ", self.prompt_path())?;
            output.flush()?;

            let Some(line) = lines.next() else {
                writeln!(output)?;
                break;
            };

            if self.execute(line?.trim(), output)? == Flow::Exit {
                break;
            }
        }

        Ok(())
    }

    /// Execute one command line, printing its result or error
    pub fn execute<W: Write>(&mut self, line: &str, output: &mut W) -> io::Result<Flow> {
        if line.is_empty() {
            return Ok(Flow::Continue);
        }

        let (command, args) = split_word(line);
        let result = match command {
            "exit" | "quit" => {
                writeln!(output, "Bye")?;
                return Ok(Flow::Exit);
            }
            "help" => writeln!(output, "{}", HELP).map_err(Into::into),
            "pwd" => writeln!(output, "{}", self.prompt_path()).map_err(Into::into),
            "cd" => self.change_directory(args, output),
            "ls" => self.list(args, output),
            "mkdir" => self.make_directory(args, output),
            "cat" => self.cat(args, output),
            "write" => self.write(args, output),
            "append" => self.append(args, output),
            "edit" => self.edit_line(args, output, false),
            "delline" => self.edit_line(args, output, true),
            "rm" => self.remove(args, output),
            "cp" => self.copy(args, output),
            "mv" => self.move_file(args, output),
            "json-read" => self.json_read(args, output),
            "json-write" => self.json_write(args, output),
            "xml-read" => self.xml_read(args, output),
            "xml-write" => self.xml_write(args, output),
            "zip" => self.zip(args, output),
            "unzip" => self.unzip(args, output),
            "files" => self.files(output),
            "disk" => self.disk(output),
            other => {
                writeln!(output, "Unknown command: {} (try 'help')", other)?;
                Ok(())
            }
        };

        if let Err(e) = result {
            writeln!(output, "Error: {:#}", e)?;
        }
        Ok(Flow::Continue)
    }

    fn prompt_path(&self) -> String {
        if self.cwd == "." {
            "/".to_string()
        } else {
            format!("/{}", self.cwd)
        }
    }

    /// Join user input onto the current directory without interpreting it
    fn join_cwd(&self, input: &str) -> String {
        match input {
            "" | "." => self.cwd.clone(),
            "/" => ".".to_string(),
            // Leave absolute input as typed so the resolver refuses it
            _ if self.cwd == "." || input.starts_with('/') || input.starts_with('\\') => {
                input.to_string()
            }
            _ => format!("{}/{}", self.cwd, input),
        }
    }

    fn resolve(&self, input: &str) -> Result<ResolvedPath> {
        Ok(self.sandbox.resolve(&self.join_cwd(input))?)
    }

    fn change_directory<W: Write>(&mut self, args: &str, output: &mut W) -> Result<()> {
        let (target, _) = split_word(args);

        let next = match target {
            "" | "." => return Ok(()),
            "/" => ".".to_string(),
            ".." => match self.cwd.rsplit_once('/') {
                Some((parent, _)) => parent.to_string(),
                None => ".".to_string(),
            },
            _ => {
                let resolved = self.resolve(target)?;
                // Must exist and be a directory
                self.sandbox.list_directory(&resolved)?;
                self.relative_to_root(&resolved)
            }
        };

        self.cwd = next;
        writeln!(output, "OK. Now in {}", self.prompt_path())?;
        Ok(())
    }

    fn relative_to_root(&self, path: &ResolvedPath) -> String {
        let parts: Vec<String> = path
            .as_path()
            .strip_prefix(self.sandbox.root())
            .map(|rel| {
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();

        if parts.is_empty() {
            ".".to_string()
        } else {
            parts.join("/")
        }
    }

    fn list<W: Write>(&self, args: &str, output: &mut W) -> Result<()> {
        let (target, _) = split_word(args);
        let path = self.resolve(target)?;
        let entries = self.sandbox.list_directory(&path)?;

        if entries.is_empty() {
            writeln!(output, "  (empty)")?;
        }
        for entry in entries {
            if entry.is_dir {
                writeln!(output, "  {}/", entry.name)?;
            } else {
                writeln!(output, "  {}\t{} bytes", entry.name, entry.size)?;
            }
        }
        Ok(())
    }

    fn make_directory<W: Write>(&self, args: &str, output: &mut W) -> Result<()> {
        let path = self.resolve(required(split_word(args).0, "mkdir <dir>")?)?;
        self.sandbox.create_directory(&path)?;
        writeln!(output, "OK. Directory created")?;
        Ok(())
    }

    fn cat<W: Write>(&self, args: &str, output: &mut W) -> Result<()> {
        let path = self.resolve(required(split_word(args).0, "cat <file>")?)?;
        let content = self.sandbox.read_to_string(&path)?;
        writeln!(output, "{}", content)?;
        Ok(())
    }

    fn write<W: Write>(&self, args: &str, output: &mut W) -> Result<()> {
        let (name, content) = split_word(args);
        let name = required(name, "write <file> <text>")?;
        let path = self.resolve(name)?;

        self.sandbox.write(&path, content.as_bytes())?;
        self.record(name, &path);
        writeln!(output, "OK. File written")?;
        Ok(())
    }

    fn append<W: Write>(&self, args: &str, output: &mut W) -> Result<()> {
        let (name, line) = split_word(args);
        let path = self.resolve(required(name, "append <file> <text>")?)?;

        self.sandbox.append(&path, format!("\n{}", line).as_bytes())?;
        writeln!(output, "OK. Line added")?;
        Ok(())
    }

    /// Replace (or with `delete`, remove) one 1-based line of a text file
    fn edit_line<W: Write>(&self, args: &str, output: &mut W, delete: bool) -> Result<()> {
        let usage = if delete { "delline <file> <n>" } else { "edit <file> <n> <text>" };
        let (name, rest) = split_word(args);
        let (number, text) = split_word(rest);
        let path = self.resolve(required(name, usage)?)?;
        let number: usize = required(number, usage)?
            .parse()
            .with_context(|| format!("not a line number: {}", number))?;

        let content = self.sandbox.read_to_string(&path)?;
        let mut lines: Vec<&str> = content.split('\n').collect();
        if number == 0 || number > lines.len() {
            bail!("line {} out of range (file has {} lines)", number, lines.len());
        }

        if delete {
            lines.remove(number - 1);
        } else {
            lines[number - 1] = text;
        }

        self.sandbox.write(&path, lines.join("\n").as_bytes())?;
        writeln!(output, "OK. Line {} {}", number, if delete { "deleted" } else { "updated" })?;
        Ok(())
    }

    fn remove<W: Write>(&self, args: &str, output: &mut W) -> Result<()> {
        let path = self.resolve(required(split_word(args).0, "rm <file>")?)?;
        self.sandbox.delete(&path)?;
        if let Some(db) = self.db {
            if let Err(e) = db.forget_location(&path.to_string()) {
                warn!(error = %e, "failed to drop file metadata");
            }
        }
        writeln!(output, "OK. File deleted")?;
        Ok(())
    }

    fn copy<W: Write>(&self, args: &str, output: &mut W) -> Result<()> {
        let (src, dst) = two_args(args, "cp <src> <dst>")?;
        self.sandbox.copy(&self.resolve(src)?, &self.resolve(dst)?)?;
        writeln!(output, "OK. File copied")?;
        Ok(())
    }

    fn move_file<W: Write>(&self, args: &str, output: &mut W) -> Result<()> {
        let (src, dst) = two_args(args, "mv <src> <dst>")?;
        let (from, to) = (self.resolve(src)?, self.resolve(dst)?);
        self.sandbox.move_file(&from, &to)?;
        if let Some(db) = self.db {
            if let Err(e) = db.relocate(&from.to_string(), &to.to_string(), dst) {
                warn!(error = %e, "failed to update file metadata");
            }
        }
        writeln!(output, "OK. File moved")?;
        Ok(())
    }

    fn json_read<W: Write>(&self, args: &str, output: &mut W) -> Result<()> {
        let path = self.resolve(required(split_word(args).0, "json-read <file>")?)?;
        let value = structured::read_json(self.sandbox, &path)?;
        writeln!(output, "{}", serde_json::to_string_pretty(&value)?)?;
        Ok(())
    }

    fn json_write<W: Write>(&self, args: &str, output: &mut W) -> Result<()> {
        let (name, text) = split_word(args);
        let path = self.resolve(required(name, "json-write <file> <json>")?)?;
        structured::write_json_text(self.sandbox, &path, text)?;
        self.record(name, &path);
        writeln!(output, "OK. JSON file written")?;
        Ok(())
    }

    fn xml_read<W: Write>(&self, args: &str, output: &mut W) -> Result<()> {
        let path = self.resolve(required(split_word(args).0, "xml-read <file>")?)?;
        let doc = structured::read_xml(self.sandbox, &path)?;
        writeln!(output, "{}", doc.content)?;
        Ok(())
    }

    fn xml_write<W: Write>(&self, args: &str, output: &mut W) -> Result<()> {
        let (name, text) = split_word(args);
        let path = self.resolve(required(name, "xml-write <file> <text>")?)?;
        let doc = XmlDocument {
            content: text.to_string(),
        };
        structured::write_xml(self.sandbox, &path, &doc)?;
        self.record(name, &path);
        writeln!(output, "OK. XML file written")?;
        Ok(())
    }

    fn zip<W: Write>(&self, args: &str, output: &mut W) -> Result<()> {
        let (src, archive) = two_args(args, "zip <src> <archive>")?;
        let stats = Archiver::new(self.sandbox).create(&self.join_cwd(src), &self.join_cwd(archive))?;
        writeln!(
            output,
            "OK. Archived {} files, {} directories ({} bytes)",
            stats.files, stats.directories, stats.bytes
        )?;
        Ok(())
    }

    fn unzip<W: Write>(&self, args: &str, output: &mut W) -> Result<()> {
        let (archive, dest) = two_args(args, "unzip <archive> <dir>")?;
        let stats = Archiver::new(self.sandbox).extract(&self.join_cwd(archive), &self.join_cwd(dest))?;
        writeln!(
            output,
            "OK. Extracted {} files, {} directories ({} bytes)",
            stats.files, stats.directories, stats.bytes
        )?;
        Ok(())
    }

    fn files<W: Write>(&self, output: &mut W) -> Result<()> {
        let Some(db) = self.db else {
            bail!("no metadata database configured");
        };

        let records = db.files_by_owner(&self.owner)?;
        if records.is_empty() {
            writeln!(output, "  (no files recorded)")?;
        }
        for record in records {
            writeln!(
                output,
                "  #{} {}\t{} bytes\t{}\t{}",
                record.id,
                record.filename,
                record.size,
                record.created_at,
                short_hash(&record.hash)
            )?;
        }
        Ok(())
    }

    fn disk<W: Write>(&self, output: &mut W) -> Result<()> {
        let usage = self.sandbox.disk_usage()?;
        writeln!(output, "Filesystem of {}", self.sandbox.root().display())?;
        writeln!(output, "  Total: {:.2} GB", gigabytes(usage.total))?;
        writeln!(output, "  Free:  {:.2} GB", gigabytes(usage.free))?;
        writeln!(
            output,
            "  Used:  {:.2} GB ({:.1}%)",
            gigabytes(usage.used()),
            usage.used_percent()
        )?;
        Ok(())
    }

    /// Bookkeeping failures never undo a successful write
    fn record(&self, name: &str, path: &ResolvedPath) {
        let Some(db) = self.db else {
            return;
        };

        let content = match self.sandbox.read(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "failed to read back file for metadata");
                return;
            }
        };

        let location = path.to_string();
        let record = NewFileRecord {
            filename: name,
            location: &location,
            owner: &self.owner,
            content: &content,
        };
        if let Err(e) = db.record_file(&record) {
            warn!(error = %e, "failed to record file metadata");
        }
    }
}

/// Leading 12 hex digits of a content hash, or all of it when shorter
fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

fn gigabytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0 * 1024.0)
}

/// Split off the first whitespace-delimited word
fn split_word(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (input, ""),
    }
}

fn required<'s>(value: &'s str, usage: &str) -> Result<&'s str> {
    if value.is_empty() {
        bail!("usage: {}", usage);
    }
    Ok(value)
}

fn two_args<'s>(args: &'s str, usage: &str) -> Result<(&'s str, &'s str)> {
    let (first, rest) = split_word(args);
    let (second, _) = split_word(rest);
    Ok((required(first, usage)?, required(second, usage)?))
}

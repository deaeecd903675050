//! Interactive terminal shell.
//!
//! Reads one line at a time and writes one reply per line. Lines starting
//! with `:` are shell commands; everything else goes through the admin gate
//! (which may recognize the trigger phrase) and is then asked.
//!
//! | Command | Effect |
//! |---------|--------|
//! | `:unlock <secret>` | unlock this session |
//! | `:upload <path>...` | replace the knowledge with the given files |
//! | `:status` | show the size of the current knowledge |
//! | `:history` | show this process's conversation log |
//! | `:quit` | leave |

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::admin::{AdminSession, Screened};
use crate::app::App;
use crate::models::Document;

/// Reads named documents from disk.
pub fn read_documents<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<Document>> {
    paths
        .iter()
        .map(|p| {
            let path = p.as_ref();
            let bytes =
                std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            Ok(Document::new(name, bytes))
        })
        .collect()
}

/// Runs the REPL until `:quit` or end of input.
pub async fn run_chat<R, W>(app: &App, input: R, out: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut session = AdminSession::new();
    let mut lines = input.lines();

    writeln!(out, "Ask a question about the uploaded documents (:quit to leave).")?;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if let Some(command) = line.strip_prefix(':') {
            let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
            match name {
                "quit" | "exit" => break,
                "unlock" => {
                    if app.gate.unlock(&mut session, rest.trim()) {
                        writeln!(out, "Admin access granted.")?;
                    } else {
                        writeln!(out, "Wrong password.")?;
                    }
                }
                "upload" => upload(app, &mut session, rest, out).await?,
                "status" => {
                    let knowledge = app.store.snapshot();
                    writeln!(
                        out,
                        "{} characters from {} document(s) (limit {}).",
                        knowledge.char_len(),
                        knowledge.source_document_names.len(),
                        knowledge.character_limit
                    )?;
                }
                "history" => {
                    for entry in app.log.entries() {
                        writeln!(
                            out,
                            "[{}] Q: {}\n    A: {}",
                            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                            entry.question,
                            entry.answer
                        )?;
                    }
                }
                other => writeln!(out, "Unknown command :{}", other)?,
            }
            continue;
        }

        match app.gate.screen(&mut session, line) {
            Screened::Empty => {}
            Screened::Unlocked => {
                writeln!(out, "Admin access granted. Use :upload <file> to add documents.")?
            }
            Screened::Question(question) => match app.ask(question).await {
                Ok(answer) => writeln!(out, "{}", answer.text)?,
                Err(e) => writeln!(out, "{}", e.user_message())?,
            },
        }
    }
    Ok(())
}

async fn upload<W: Write>(app: &App, session: &mut AdminSession, args: &str, out: &mut W) -> Result<()> {
    let paths: Vec<&str> = args.split_whitespace().collect();
    if paths.is_empty() {
        writeln!(out, "Usage: :upload <file> [<file>...]")?;
        return Ok(());
    }
    if !app.gate.may_mutate(session, None) {
        writeln!(out, "Admin access required.")?;
        return Ok(());
    }
    let documents = match read_documents(&paths) {
        Ok(docs) => docs,
        Err(e) => {
            writeln!(out, "{:#}", e)?;
            return Ok(());
        }
    };
    if !app.gate.authorize_mutation(session, None) {
        writeln!(out, "Admin access required.")?;
        return Ok(());
    }
    match app.store.ingest(&documents).await {
        Ok(knowledge) => writeln!(
            out,
            "Uploaded {} document(s); {} characters stored.",
            documents.len(),
            knowledge.char_len()
        )?,
        Err(e) => writeln!(out, "Upload failed: {}", e)?,
    }
    Ok(())
}

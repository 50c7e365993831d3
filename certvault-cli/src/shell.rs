//! Interactive shell over the local cache.

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use certvault_core::{AutoSync, LocalCache, SecretKind};
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

const PROMPT: &str = "certvault> ";

const HELP: &str = "\
Available commands:
  help           show this message
  add            create a secret (prompts for type, comment and data)
  list           show every live secret, decrypted
  get <id>       show one secret
  edit <id>      replace a secret's data and comment
  delete <id>    delete a secret everywhere on next sync
  sync           sync with the server now
  exit           leave the shell";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Help,
    Add,
    List,
    Get(String),
    Edit(String),
    Delete(String),
    Sync,
    Exit,
}

impl Command {
    /// `Ok(None)` for a blank line, `Err` with a usage hint otherwise.
    fn parse(line: &str) -> std::result::Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(None);
        };
        let id = words.next().map(str::to_string);

        let cmd = match (name, id) {
            ("help", _) => Self::Help,
            ("add", _) => Self::Add,
            ("list", _) => Self::List,
            ("sync", _) => Self::Sync,
            ("exit" | "quit", _) => Self::Exit,
            ("get", Some(id)) => Self::Get(id),
            ("edit", Some(id)) => Self::Edit(id),
            ("delete", Some(id)) => Self::Delete(id),
            ("get" | "edit" | "delete", None) => return Err(format!("Usage: {name} <id>")),
            _ => return Err("Unknown command. Type 'help' for a list of commands.".to_string()),
        };
        Ok(Some(cmd))
    }
}

enum Flow {
    Continue,
    Exit,
}

pub struct Shell {
    cache: Arc<LocalCache>,
    agent: Option<AutoSync>,
}

impl Shell {
    /// `agent` is used by the `sync` command; without one the shell works
    /// offline.
    pub fn new(cache: Arc<LocalCache>, agent: Option<AutoSync>) -> Self {
        Self { cache, agent }
    }

    /// Read commands from `input` until `exit` or end of input.
    pub async fn run<R, W>(&self, input: R, out: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let mut lines = input.lines();
        loop {
            write!(out, "{PROMPT}")?;
            out.flush()?;

            let Some(line) = lines.next_line().await? else {
                writeln!(out)?;
                break;
            };

            let cmd = match Command::parse(&line) {
                Ok(Some(cmd)) => cmd,
                Ok(None) => continue,
                Err(usage) => {
                    writeln!(out, "{usage}")?;
                    continue;
                }
            };

            match self.execute(cmd, &mut lines, out).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => break,
                Err(e) => writeln!(out, "Error: {e:#}")?,
            }
        }
        Ok(())
    }

    async fn execute<R, W>(&self, cmd: Command, lines: &mut Lines<R>, out: &mut W) -> Result<Flow>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        match cmd {
            Command::Help => writeln!(out, "{HELP}")?,
            Command::Add => return self.add(lines, out).await,
            Command::List => self.list(out)?,
            Command::Get(id) => self.get(&id, out)?,
            Command::Edit(id) => return self.edit(&id, lines, out).await,
            Command::Delete(id) => {
                if self.cache.delete(&id)? {
                    writeln!(out, "Secret deleted")?;
                } else {
                    writeln!(out, "Secret not found")?;
                }
            }
            Command::Sync => self.sync(out).await?,
            Command::Exit => {
                writeln!(out, "Bye")?;
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Continue)
    }

    async fn add<R, W>(&self, lines: &mut Lines<R>, out: &mut W) -> Result<Flow>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let Some(kind) = prompt(lines, out, "Type (login_password/text/binary/card): ").await? else {
            return Ok(Flow::Exit);
        };
        let kind: SecretKind = match kind.trim().parse() {
            Ok(kind) => kind,
            Err(e) => {
                writeln!(out, "{e}")?;
                return Ok(Flow::Continue);
            }
        };
        let Some(comment) = prompt(lines, out, "Comment: ").await? else {
            return Ok(Flow::Exit);
        };
        let Some(data) = read_payload(kind, lines, out).await? else {
            return Ok(Flow::Exit);
        };

        let secret = self.cache.create(kind, comment.trim(), &data)?;
        writeln!(out, "Added secret {}", secret.id)?;
        Ok(Flow::Continue)
    }

    fn list<W: Write>(&self, out: &mut W) -> Result<()> {
        let secrets = self.cache.list()?;
        if secrets.is_empty() {
            writeln!(out, "No secrets")?;
            return Ok(());
        }
        for view in secrets {
            let shown = match &view.plaintext {
                Ok(bytes) => render(view.kind, bytes),
                Err(e) => format!("<cannot decrypt: {e}>"),
            };
            writeln!(
                out,
                "{}  {:<14} {:<20} {}",
                view.id, view.kind, view.comment, shown
            )?;
        }
        Ok(())
    }

    fn get<W: Write>(&self, id: &str, out: &mut W) -> Result<()> {
        let Some(secret) = self.cache.get(id)? else {
            writeln!(out, "Secret not found")?;
            return Ok(());
        };
        let data = self.cache.decrypt(&secret)?;
        let view = json!({
            "id": secret.id,
            "type": secret.kind,
            "comment": secret.comment,
            "version": secret.version,
            "data": render(secret.kind, &data),
        });
        writeln!(out, "{}", serde_json::to_string_pretty(&view)?)?;
        Ok(())
    }

    async fn edit<R, W>(&self, id: &str, lines: &mut Lines<R>, out: &mut W) -> Result<Flow>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        if self.cache.get(id)?.is_none() {
            writeln!(out, "Secret not found")?;
            return Ok(Flow::Continue);
        }

        let Some(path) = prompt(lines, out, "File path to load (empty for manual input): ").await?
        else {
            return Ok(Flow::Exit);
        };
        let data = if path.trim().is_empty() {
            let Some(data) = prompt(lines, out, "New data: ").await? else {
                return Ok(Flow::Exit);
            };
            data.into_bytes()
        } else {
            match tokio::fs::read(path.trim()).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    writeln!(out, "Failed to read {}: {e}", path.trim())?;
                    return Ok(Flow::Continue);
                }
            }
        };
        let Some(comment) = prompt(lines, out, "New comment (empty keeps current): ").await? else {
            return Ok(Flow::Exit);
        };
        let comment = comment.trim();
        let comment = (!comment.is_empty()).then_some(comment);

        if self.cache.edit(id, &data, comment)? {
            writeln!(out, "Secret updated")?;
        } else {
            writeln!(out, "Secret not found")?;
        }
        Ok(Flow::Continue)
    }

    async fn sync<W: Write>(&self, out: &mut W) -> Result<()> {
        let Some(agent) = &self.agent else {
            writeln!(out, "Sync is not configured")?;
            return Ok(());
        };
        match agent.sync_once().await {
            Ok(report) => writeln!(
                out,
                "Synced: sent {}, accepted {}, skipped {}, received {} (server version {})",
                report.sent,
                report.updated,
                report.skipped,
                report.merge.replaced + report.merge.appended + report.merge.removed,
                report.server_version
            )?,
            Err(e) => writeln!(out, "Sync failed: {e}")?,
        }
        Ok(())
    }
}

async fn prompt<R, W>(lines: &mut Lines<R>, out: &mut W, message: &str) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    write!(out, "{message}")?;
    out.flush()?;
    Ok(lines.next_line().await?)
}

/// Collect the plaintext for a new secret. Structured kinds are stored as
/// JSON, binary secrets are loaded from a file.
async fn read_payload<R, W>(
    kind: SecretKind,
    lines: &mut Lines<R>,
    out: &mut W,
) -> Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let payload = match kind {
        SecretKind::Text => prompt(lines, out, "Data: ").await?.map(String::into_bytes),
        SecretKind::Binary => match prompt(lines, out, "File path: ").await? {
            Some(path) => Some(tokio::fs::read(path.trim()).await?),
            None => None,
        },
        SecretKind::LoginPassword => {
            let Some(login) = prompt(lines, out, "Login: ").await? else {
                return Ok(None);
            };
            let Some(password) = prompt(lines, out, "Password: ").await? else {
                return Ok(None);
            };
            Some(serde_json::to_vec(&json!({
                "login": login.trim(),
                "password": password,
            }))?)
        }
        SecretKind::Card => {
            let mut fields = Vec::with_capacity(4);
            for label in ["Number", "Expiry", "Holder", "CVC"] {
                let Some(value) = prompt(lines, out, &format!("{label}: ")).await? else {
                    return Ok(None);
                };
                fields.push(value.trim().to_string());
            }
            Some(serde_json::to_vec(&json!({
                "number": fields[0],
                "expiry": fields[1],
                "holder": fields[2],
                "cvc": fields[3],
            }))?)
        }
    };
    Ok(payload)
}

fn render(kind: SecretKind, data: &[u8]) -> String {
    match kind {
        SecretKind::Binary => format!("<{} bytes>", data.len()),
        _ => String::from_utf8_lossy(data).into_owned(),
    }
}

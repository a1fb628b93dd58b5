//! Line-oriented front end: commands, autocomplete and the read loop.

use color_eyre::{eyre::eyre, Result};
use std::fmt::Write as _;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use crate::cache::CacheState;
use crate::roster::{export, ExportKind, FieldCatalog, SearchCriteria};
use crate::service::{RosterService, SubmitOutcome};
use crate::session::{SearchMode, Session, Step};
use crate::store::{RecordStore, Row};

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub usage: &'static str,
  pub description: &'static str,
  pub admin: bool,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "find",
    aliases: &["f", "id"],
    usage: "find <personal id>",
    description: "Look up your record by personal id",
    admin: false,
  },
  Command {
    name: "find-name",
    aliases: &["fn", "name"],
    usage: "find-name <full name> | <birth date>",
    description: "Look up your record by full name and birth date",
    admin: false,
  },
  Command {
    name: "pick",
    aliases: &["p", "select"],
    usage: "pick <n>",
    description: "Edit the n-th record of the last search",
    admin: false,
  },
  Command {
    name: "show",
    aliases: &["s"],
    usage: "show",
    description: "Show the record being edited",
    admin: false,
  },
  Command {
    name: "set",
    aliases: &["e", "edit"],
    usage: "set <field> = <value>",
    description: "Change a field (saved only on 'save')",
    admin: false,
  },
  Command {
    name: "save",
    aliases: &["w"],
    usage: "save",
    description: "Save your changes",
    admin: false,
  },
  Command {
    name: "cancel",
    aliases: &["c"],
    usage: "cancel",
    description: "Discard your changes and go back to the matches",
    admin: false,
  },
  Command {
    name: "back",
    aliases: &["b", "restart"],
    usage: "back",
    description: "Start a new search",
    admin: false,
  },
  Command {
    name: "status",
    aliases: &["st"],
    usage: "status",
    description: "Show where you are and how fresh the data is",
    admin: false,
  },
  Command {
    name: "admin",
    aliases: &["login"],
    usage: "admin <password>",
    description: "Unlock administrator commands",
    admin: false,
  },
  Command {
    name: "progress",
    aliases: &["pr"],
    usage: "progress",
    description: "How many records have been updated",
    admin: true,
  },
  Command {
    name: "refresh",
    aliases: &["r", "reload"],
    usage: "refresh",
    description: "Reload the roster from the store",
    admin: true,
  },
  Command {
    name: "export",
    aliases: &["x"],
    usage: "export <all|pending> [path]",
    description: "Write records to a CSV file",
    admin: true,
  },
  Command {
    name: "help",
    aliases: &["h", "?"],
    usage: "help",
    description: "List commands",
    admin: false,
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    usage: "quit",
    description: "Exit rostersync",
    admin: false,
  },
];

/// Get autocomplete suggestions for a given input
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input_lower = input.to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<(&Command, u32)> = Vec::new();

  for cmd in COMMANDS {
    if cmd.name == input_lower {
      matches.push((cmd, 0));
    } else if cmd.aliases.contains(&input_lower.as_str()) {
      matches.push((cmd, 1));
    } else if cmd.name.starts_with(&input_lower) {
      matches.push((cmd, 2));
    } else if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 3));
    } else if cmd.name.contains(&input_lower) {
      matches.push((cmd, 4));
    }
  }

  matches.sort_by_key(|(_, priority)| *priority);
  matches.into_iter().map(|(cmd, _)| cmd).collect()
}

/// The command a word names exactly, by name or alias.
fn resolve(word: &str) -> Option<&'static Command> {
  let word = word.to_lowercase();
  COMMANDS
    .iter()
    .find(|cmd| cmd.name == word || cmd.aliases.contains(&word.as_str()))
}

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
  Find(String),
  FindName { name: String, birth_date: String },
  Pick(usize),
  Show,
  Set { field: String, value: String },
  Save,
  Cancel,
  Back,
  Status,
  Admin(String),
  Progress,
  Refresh,
  Export { kind: ExportKind, path: Option<PathBuf> },
  Help,
  Quit,
}

pub fn parse_line(line: &str) -> Result<Input, String> {
  let line = line.trim();
  let (word, rest) = match line.split_once(char::is_whitespace) {
    Some((word, rest)) => (word, rest.trim()),
    None => (line, ""),
  };

  let Some(cmd) = resolve(word) else {
    let hints: Vec<&str> = get_suggestions(word).iter().take(3).map(|c| c.name).collect();
    return Err(if hints.is_empty() {
      format!("Unknown command '{}'. Type 'help' for a list.", word)
    } else {
      format!("Unknown command '{}'. Did you mean: {}?", word, hints.join(", "))
    });
  };
  let usage = || format!("Usage: {}", cmd.usage);

  let input = match cmd.name {
    "find" if !rest.is_empty() => Input::Find(rest.to_string()),
    "find-name" => {
      let (name, birth_date) = rest.split_once('|').ok_or_else(usage)?;
      Input::FindName {
        name: name.trim().to_string(),
        birth_date: birth_date.trim().to_string(),
      }
    }
    "pick" => Input::Pick(rest.parse().ok().filter(|n| *n > 0).ok_or_else(usage)?),
    "show" => Input::Show,
    "set" => {
      let (field, value) = rest.split_once('=').ok_or_else(usage)?;
      let field = field.trim();
      if field.is_empty() {
        return Err(usage());
      }
      Input::Set {
        field: field.to_string(),
        value: value.trim().to_string(),
      }
    }
    "save" => Input::Save,
    "cancel" => Input::Cancel,
    "back" => Input::Back,
    "status" => Input::Status,
    "admin" => Input::Admin(rest.to_string()),
    "progress" => Input::Progress,
    "refresh" => Input::Refresh,
    "export" => {
      let mut args = rest.split_whitespace();
      let kind = match args.next() {
        Some("all") => ExportKind::All,
        Some("pending") => ExportKind::Pending,
        _ => return Err(usage()),
      };
      Input::Export {
        kind,
        path: args.next().map(PathBuf::from),
      }
    }
    "help" => Input::Help,
    "quit" => Input::Quit,
    _ => return Err(usage()),
  };
  Ok(input)
}

/// A catalog field named loosely: exact, then case-insensitive on its label.
fn match_field<'c>(catalog: &'c FieldCatalog, name: &str) -> Option<&'c str> {
  let wanted = FieldCatalog::label(name).to_lowercase();
  catalog
    .fields
    .iter()
    .find(|f| f.as_str() == name)
    .or_else(|| {
      catalog
        .fields
        .iter()
        .find(|f| FieldCatalog::label(f).to_lowercase() == wanted)
    })
    .map(String::as_str)
}

fn summary(catalog: &FieldCatalog, row: &Row) -> String {
  let mut parts = Vec::new();
  for field in [&catalog.search.full_name, &catalog.search.birth_date]
    .into_iter()
    .flatten()
  {
    let value = row.get(field);
    if !value.is_empty() {
      parts.push(value.to_string());
    }
  }
  parts.push(format!("{} {}", FieldCatalog::label(&catalog.id_field), row.get(&catalog.id_field)));
  parts.join(", ")
}

/// An interactive session over stdin/stdout.
pub struct Console<S> {
  service: RosterService<S>,
  session: Session,
  admin_password: Option<String>,
  admin: bool,
}

impl<S: RecordStore> Console<S> {
  pub fn new(service: RosterService<S>, admin_password: Option<String>) -> Self {
    Self {
      service,
      session: Session::new(),
      admin_password,
      admin: false,
    }
  }

  fn prompt(&self) -> &'static str {
    match self.session.step {
      Step::Search => "search> ",
      Step::Select => "select> ",
      Step::Edit => "edit> ",
      Step::Done => "done> ",
    }
  }

  pub async fn run(&mut self) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    let welcome = "Type 'find <personal id>' to look up your record, or 'help'.\n";
    stdout
      .write_all(welcome.as_bytes())
      .await
      .map_err(|e| eyre!("Failed to write to terminal: {}", e))?;

    loop {
      stdout
        .write_all(self.prompt().as_bytes())
        .await
        .map_err(|e| eyre!("Failed to write to terminal: {}", e))?;
      stdout.flush().await.map_err(|e| eyre!("Failed to write to terminal: {}", e))?;

      let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| eyre!("Failed to read input: {}", e))?
      else {
        break;
      };
      if line.trim().is_empty() {
        continue;
      }

      let output = match parse_line(&line) {
        Ok(Input::Quit) => break,
        Ok(input) => self.handle(input).await,
        Err(message) => message,
      };
      stdout
        .write_all(format!("{}\n", output.trim_end()).as_bytes())
        .await
        .map_err(|e| eyre!("Failed to write to terminal: {}", e))?;
    }

    info!("console session ended");
    Ok(())
  }

  /// Execute one command and return what to print.
  pub async fn handle(&mut self, input: Input) -> String {
    if let Some(cmd) = self.admin_command(&input) {
      if !self.admin {
        return format!("'{}' needs administrator access. Use 'admin <password>' first.", cmd);
      }
    }

    match input {
      Input::Find(id) => {
        self.session.switch_search_mode(SearchMode::PersonalId);
        self.search(SearchCriteria::PersonalId(id)).await
      }
      Input::FindName { name, birth_date } => {
        self.session.switch_search_mode(SearchMode::NameAndBirthDate);
        self.search(SearchCriteria::NameAndBirthDate { name, birth_date }).await
      }
      Input::Pick(n) => self.pick(n).await,
      Input::Show => self.show().await,
      Input::Set { field, value } => self.set(&field, value),
      Input::Save => self.save().await,
      Input::Cancel => {
        if self.session.step != Step::Edit {
          return "Nothing is being edited.".to_string();
        }
        self.session.cancel_edit();
        "Changes discarded.".to_string()
      }
      Input::Back => {
        self.session.restart();
        "Start a new search with 'find <personal id>'.".to_string()
      }
      Input::Status => self.status(),
      Input::Admin(password) => self.login(&password),
      Input::Progress => match self.service.admin_progress().await {
        Ok(progress) => format!(
          "{} of {} records updated ({:.1}%), {} pending.",
          progress.updated,
          progress.total,
          progress.percent_updated(),
          progress.pending
        ),
        Err(err) => err.to_string(),
      },
      Input::Refresh => match self.service.admin_refresh().await {
        Ok(report) => {
          let change = match report.changed {
            Some(true) => "data changed since the last load",
            Some(false) => "no changes",
            None => "first load",
          };
          format!("Reloaded {} records ({}).", report.rows, change)
        }
        Err(err) => err.to_string(),
      },
      Input::Export { kind, path } => {
        let path = path.unwrap_or_else(|| export::default_path(kind));
        match self.service.export(kind, &path).await {
          Ok(count) => format!("Exported {} records to {}.", count, path.display()),
          Err(err) => err.to_string(),
        }
      }
      Input::Help => help_text(self.admin),
      Input::Quit => String::new(),
    }
  }

  fn admin_command(&self, input: &Input) -> Option<&'static str> {
    match input {
      Input::Progress => Some("progress"),
      Input::Refresh => Some("refresh"),
      Input::Export { .. } => Some("export"),
      _ => None,
    }
  }

  fn login(&mut self, password: &str) -> String {
    match &self.admin_password {
      None => "Administrator access is not configured.".to_string(),
      Some(expected) if expected == password => {
        self.admin = true;
        info!("administrator unlocked");
        "Administrator commands unlocked.".to_string()
      }
      Some(_) => {
        warn!("failed administrator login");
        "Wrong password.".to_string()
      }
    }
  }

  async fn search(&mut self, criteria: SearchCriteria) -> String {
    match self.service.search(&mut self.session, criteria).await {
      Ok(hits) if hits.is_empty() => {
        if self.session.offer_name_search {
          "No record found. Try 'find-name <full name> | <birth date>'.".to_string()
        } else {
          "No record found.".to_string()
        }
      }
      Ok(_) => self.list_results(),
      Err(err) => err.to_string(),
    }
  }

  fn list_results(&self) -> String {
    let catalog = self.service.catalog();
    let mut out = String::new();
    for (i, row) in self.session.results.iter().enumerate() {
      let _ = writeln!(out, "{:>3}. {}", i + 1, summary(catalog, row));
    }
    out.push_str("Use 'pick <n>' to edit a record.");
    out
  }

  async fn pick(&mut self, n: usize) -> String {
    let id_field = &self.service.catalog().id_field;
    let Some(row_id) = n
      .checked_sub(1)
      .and_then(|i| self.session.results.get(i))
      .map(|row| row.get(id_field).to_string())
    else {
      return format!("No match number {}.", n);
    };

    match self.service.load_for_edit(&mut self.session, &row_id).await {
      Ok(row) => self.render_row(&row),
      Err(err) => err.to_string(),
    }
  }

  async fn show(&mut self) -> String {
    let Some(row_id) = self.session.selected.clone() else {
      return "Pick a record first.".to_string();
    };
    match self.service.load_for_edit(&mut self.session, &row_id).await {
      Ok(row) => self.render_row(&row),
      Err(err) => err.to_string(),
    }
  }

  fn render_row(&self, row: &Row) -> String {
    let catalog = self.service.catalog();
    let mut out = String::new();
    for field in &catalog.fields {
      let label = FieldCatalog::label(field);
      let marker = if catalog.is_read_only(field) { " (read-only)" } else { "" };
      match self.session.pending.get(field) {
        Some(new) if new != row.get(field) => {
          let _ = writeln!(out, "  {}: {} -> {}{}", label, row.get(field), new, marker);
        }
        _ => {
          let _ = writeln!(out, "  {}: {}{}", label, row.get(field), marker);
        }
      }
    }
    out
  }

  fn set(&mut self, field: &str, value: String) -> String {
    if self.session.step != Step::Edit {
      return "Pick a record first.".to_string();
    }
    let catalog = self.service.catalog();
    let Some(field) = match_field(catalog, field) else {
      return format!("No field named '{}'.", field);
    };
    if catalog.is_read_only(field) {
      return format!("'{}' cannot be changed.", FieldCatalog::label(field));
    }
    let label = FieldCatalog::label(field);
    self.session.pending.set(field, value);
    format!("{} set. Type 'save' when done.", label)
  }

  async fn save(&mut self) -> String {
    if self.session.step != Step::Edit {
      return "Pick a record first.".to_string();
    }
    match self.service.save(&mut self.session).await {
      SubmitOutcome::Saved(receipt) if receipt.backup_logged => "Saved. Type 'back' to look up another record.".to_string(),
      SubmitOutcome::Saved(_) => "Saved (the backup log could not be updated). Type 'back' to look up another record.".to_string(),
      SubmitOutcome::Invalid(missing) => format!("Please fill in: {}.", missing.join(", ")),
      SubmitOutcome::Failed(err) => format!("{} Your changes are kept; type 'save' to retry.", err),
    }
  }

  fn status(&self) -> String {
    let step = match self.session.step {
      Step::Search => "searching",
      Step::Select => "choosing a match",
      Step::Edit => "editing",
      Step::Done => "saved",
    };
    let data = match (self.service.cache_state(), self.service.cached_table()) {
      (CacheState::Absent, _) | (_, None) => "not loaded".to_string(),
      (state, Some(snapshot)) => format!(
        "{} records loaded at {}{}",
        snapshot.len(),
        snapshot.fetched_at().with_timezone(&chrono::Local).format("%H:%M:%S"),
        if state == CacheState::Stale { " (stale)" } else { "" }
      ),
    };
    let mut out = format!("Step: {}. Data: {}.", step, data);
    if !self.session.pending.is_empty() {
      out.push_str(" You have unsaved changes.");
    }
    out
  }
}

fn help_text(admin: bool) -> String {
  let mut out = String::new();
  for cmd in COMMANDS.iter().filter(|c| admin || !c.admin) {
    let _ = writeln!(out, "  {:<38} {}", cmd.usage, cmd.description);
  }
  out
}
